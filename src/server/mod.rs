//! Server Module
//!
//! Everything that sits around the connection state machine: the TCP
//! listener, the shared dispatcher that runs storage work off the I/O
//! threads, and one driver task per accepted client.
//!
//! ## Architecture
//!
//! ```text
//!   TcpListener ── accept ──> handle_connection (task per client)
//!        │                          │
//!        │                          ▼
//!        │                    drive(Connection) <── completions ──┐
//!        │                          │                             │
//!        │                     submit(op)                         │
//!        │                          ▼                             │
//!        │                  ServerDispatcher ── spawn_blocking ── StorageEngine
//!        │                          │
//!        └──── stop <── shutdown watch channel
//! ```

pub mod config;
pub mod dispatcher;
pub mod driver;
pub mod stats;

pub use config::{ConfigError, ServerConfig};
pub use dispatcher::{Registration, ServerDispatcher};
pub use driver::{drive, handle_connection};
pub use stats::ServerStats;

use crate::storage::StorageEngine;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tracing::{error, info};

/// Errors raised while starting a server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind listener: {0}")]
    Bind(#[from] io::Error),
}

/// A bound TreeKV server.
pub struct Server {
    listener: TcpListener,
    dispatcher: Arc<ServerDispatcher>,
    config: ServerConfig,
}

impl Server {
    /// Validates `config` and binds its address.
    ///
    /// Must be called from within a tokio runtime; backend work runs on that
    /// runtime's blocking pool.
    pub async fn bind(config: ServerConfig, engine: Arc<StorageEngine>) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_address()).await?;
        let dispatcher = Arc::new(ServerDispatcher::new(
            engine,
            Arc::new(ServerStats::new()),
            Handle::current(),
        ));

        Ok(Self {
            listener,
            dispatcher,
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn dispatcher(&self) -> &Arc<ServerDispatcher> {
        &self.dispatcher
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        self.dispatcher.stats()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accepts clients until a client sends `shutdown`.
    ///
    /// Connections already running keep going until they finish on their own.
    pub async fn run(self) {
        let mut shutdown = self.dispatcher.shutdown_signal();
        let limits = self.config.limits();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let dispatcher = Arc::clone(&self.dispatcher);
                        tokio::spawn(async move {
                            handle_connection(stream, addr, dispatcher, limits).await;
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("Listener stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;
    use tokio_test::assert_ok;

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            ..ServerConfig::default()
        }
    }

    async fn start() -> (SocketAddr, Arc<ServerDispatcher>, JoinHandle<()>) {
        let server = assert_ok!(Server::bind(test_config(), Arc::new(StorageEngine::new())).await);
        let addr = assert_ok!(server.local_addr());
        let dispatcher = Arc::clone(server.dispatcher());
        let handle = tokio::spawn(server.run());
        (addr, dispatcher, handle)
    }

    async fn expect(stream: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        assert_ok!(
            tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
                .await
                .unwrap()
        );
        assert_eq!(
            String::from_utf8_lossy(&buf),
            String::from_utf8_lossy(expected)
        );
    }

    #[tokio::test]
    async fn test_bind_rejects_tiny_buffers() {
        let config = ServerConfig {
            read_buffer_size: 8,
            ..test_config()
        };
        let result = Server::bind(config, Arc::new(StorageEngine::new())).await;
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (addr, _, _) = start().await;
        let mut client = assert_ok!(TcpStream::connect(addr).await);

        assert_ok!(client.write_all(b"set name 4\r\nAriz\r\n").await);
        expect(&mut client, b"STORED\r\n").await;

        assert_ok!(client.write_all(b"get name\r\n").await);
        expect(&mut client, b"VALUE name 4\r\nAriz\r\nEND\r\n").await;
    }

    #[tokio::test]
    async fn test_pipelined_requests_in_one_write() {
        let (addr, _, _) = start().await;
        let mut client = assert_ok!(TcpStream::connect(addr).await);

        assert_ok!(
            client
                .write_all(b"set a 1\r\n1\r\nincr a 41\r\nversion\r\nget a\r\n")
                .await
        );
        let expected = format!(
            "STORED\r\n42\r\nVERSION {}\r\nVALUE a 2\r\n42\r\nEND\r\n",
            crate::VERSION
        );
        expect(&mut client, expected.as_bytes()).await;
    }

    #[tokio::test]
    async fn test_fragmented_request() {
        let (addr, _, _) = start().await;
        let mut client = assert_ok!(TcpStream::connect(addr).await);

        assert_ok!(client.write_all(b"set k 3\r\nabc\r\nge").await);
        expect(&mut client, b"STORED\r\n").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_ok!(client.write_all(b"t k\r\n").await);
        expect(&mut client, b"VALUE k 3\r\nabc\r\nEND\r\n").await;
    }

    #[tokio::test]
    async fn test_range_and_delete() {
        let (addr, _, _) = start().await;
        let mut client = assert_ok!(TcpStream::connect(addr).await);

        assert_ok!(
            client
                .write_all(b"set b 1\r\n2\r\nset a 1\r\n1\r\nset c 1\r\n3\r\n")
                .await
        );
        expect(&mut client, b"STORED\r\nSTORED\r\nSTORED\r\n").await;

        assert_ok!(client.write_all(b"range a c\r\n").await);
        expect(&mut client, b"VALUE a 1\r\n1\r\nVALUE b 1\r\n2\r\nEND\r\n").await;

        assert_ok!(client.write_all(b"delete b\r\ndelete b\r\n").await);
        expect(&mut client, b"DELETED\r\nNOT_FOUND\r\n").await;
    }

    #[tokio::test]
    async fn test_stats_and_flush_all() {
        let (addr, _, _) = start().await;
        let mut client = assert_ok!(TcpStream::connect(addr).await);

        assert_ok!(client.write_all(b"set a 1\r\n1\r\nstats\r\n").await);
        expect(
            &mut client,
            b"STORED\r\nSTAT curr_items 1\r\nSTAT cmd_get 0\r\nSTAT cmd_set 1\r\n\
              STAT cmd_delete 0\r\nSTAT cmd_range 0\r\nEND\r\n",
        )
        .await;

        assert_ok!(client.write_all(b"flush_all\r\nget a\r\n").await);
        expect(&mut client, b"OK\r\nEND\r\n").await;
    }

    #[tokio::test]
    async fn test_oversized_set_keeps_connection_usable() {
        let config = ServerConfig {
            read_buffer_size: 64,
            ..test_config()
        };
        let server = assert_ok!(Server::bind(config, Arc::new(StorageEngine::new())).await);
        let addr = assert_ok!(server.local_addr());
        tokio::spawn(server.run());
        let mut client = assert_ok!(TcpStream::connect(addr).await);

        let mut wire = b"set big 200\r\n".to_vec();
        wire.extend_from_slice(&[b'v'; 100]);
        wire.extend_from_slice(b"delete victim\r\n");
        wire.extend_from_slice(&[b'v'; 85]);
        wire.extend_from_slice(b"\r\nget big\r\n");
        assert_ok!(client.write_all(&wire).await);

        expect(
            &mut client,
            b"SERVER_ERROR object too large for buffer\r\nEND\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_connection() {
        let (addr, _, _) = start().await;
        let mut client = assert_ok!(TcpStream::connect(addr).await);

        assert_ok!(client.write_all(b"bogus\r\n").await);
        expect(&mut client, b"ERROR\r\n").await;

        assert_ok!(client.write_all(b"get missing\r\n").await);
        expect(&mut client, b"END\r\n").await;
    }

    #[tokio::test]
    async fn test_quit_closes_connection() {
        let (addr, dispatcher, _) = start().await;
        let mut client = assert_ok!(TcpStream::connect(addr).await);

        assert_ok!(client.write_all(b"quit\r\n").await);
        let mut buf = [0u8; 16];
        let n = assert_ok!(
            tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
                .await
                .unwrap()
        );
        assert_eq!(n, 0);

        for _ in 0..100 {
            if dispatcher.stats().active_connections.load(Ordering::Relaxed) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(dispatcher.stats().active_connections.load(Ordering::Relaxed), 0);
        assert_eq!(dispatcher.stats().connections_accepted.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_listener() {
        let (addr, _, handle) = start().await;
        let mut client = assert_ok!(TcpStream::connect(addr).await);

        assert_ok!(client.write_all(b"shutdown\r\n").await);
        assert_ok!(
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_stats_count_backend_requests() {
        let (addr, dispatcher, _) = start().await;
        let mut client = assert_ok!(TcpStream::connect(addr).await);

        assert_ok!(client.write_all(b"set x 1\r\n1\r\nget x\r\nversion\r\n").await);
        let expected = format!("STORED\r\nVALUE x 1\r\n1\r\nEND\r\nVERSION {}\r\n", crate::VERSION);
        expect(&mut client, expected.as_bytes()).await;

        // The worker counts a completion just after handing it over
        let stats = dispatcher.stats();
        for _ in 0..100 {
            if stats.requests_completed.load(Ordering::Relaxed) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stats.requests_submitted.load(Ordering::Relaxed), 2);
        assert_eq!(stats.requests_completed.load(Ordering::Relaxed), 2);
        assert_eq!(stats.late_completions.load(Ordering::Relaxed), 0);
    }
}
