//! Backend Dispatcher
//!
//! The dispatcher is the one object every connection shares. It hands storage
//! operations to blocking worker threads and routes each finished operation
//! back to the connection that submitted it.
//!
//! ## Completion Routing
//!
//! ```text
//!  register() ──> ConnectionId + completion receiver
//!
//!  submit(ticket, op) ──spawn_blocking──> engine.execute(op)
//!                                               │
//!                              routes[ticket.conn]?
//!                              ├─ present ──> send Completion
//!                              └─ absent  ──> drop, count as late
//!
//!  release(id) ──> remove route
//! ```
//!
//! Connection identifiers are never reused, so a completion for a connection
//! that was destroyed while its request ran can never reach a newer
//! connection.

use crate::connection::{Completion, ConnectionId, Dispatcher, Ticket};
use crate::server::stats::ServerStats;
use crate::storage::{Operation, StorageEngine};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};

/// A freshly registered connection.
#[derive(Debug)]
pub struct Registration {
    pub id: ConnectionId,
    /// Completions addressed to `id`
    pub completions: mpsc::UnboundedReceiver<Completion>,
}

/// Map from live connections to their completion channels.
#[derive(Debug)]
struct CompletionRouter {
    routes: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Completion>>>,
    stats: Arc<ServerStats>,
}

impl CompletionRouter {
    fn deliver(&self, completion: Completion) {
        let ticket = completion.ticket;
        let routes = self.routes.lock().unwrap();

        let delivered = routes
            .get(&ticket.conn)
            .map(|tx| tx.send(completion).is_ok())
            .unwrap_or(false);

        if delivered {
            self.stats.request_completed();
        } else {
            self.stats.late_completion();
            debug!(conn = %ticket.conn, seq = ticket.seq, "completion for a closed connection dropped");
        }
    }
}

/// Shared backend access for all connections of a server.
#[derive(Debug)]
pub struct ServerDispatcher {
    engine: Arc<StorageEngine>,
    router: Arc<CompletionRouter>,
    runtime: Handle,
    next_id: AtomicU64,
    stats: Arc<ServerStats>,
    shutdown: watch::Sender<bool>,
}

impl ServerDispatcher {
    /// Creates a dispatcher that runs backend work on `runtime`'s blocking pool.
    pub fn new(engine: Arc<StorageEngine>, stats: Arc<ServerStats>, runtime: Handle) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            engine,
            router: Arc::new(CompletionRouter {
                routes: Mutex::new(HashMap::new()),
                stats: Arc::clone(&stats),
            }),
            runtime,
            next_id: AtomicU64::new(1),
            stats,
            shutdown,
        }
    }

    /// Allocates a connection identity and its completion channel.
    pub fn register(&self) -> Registration {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.router.routes.lock().unwrap().insert(id, tx);
        self.stats.connection_opened();
        Registration {
            id,
            completions: rx,
        }
    }

    /// Asks the server to stop accepting connections.
    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.send_replace(true);
    }

    /// A receiver that flips to `true` once shutdown is requested.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }
}

impl Dispatcher for ServerDispatcher {
    fn submit(&self, ticket: Ticket, op: Operation) {
        self.stats.request_submitted();
        trace!(conn = %ticket.conn, seq = ticket.seq, op = op.name(), "dispatching");

        let engine = Arc::clone(&self.engine);
        let router = Arc::clone(&self.router);
        self.runtime.spawn_blocking(move || {
            let reply = engine.execute(op);
            router.deliver(Completion { ticket, reply });
        });
    }

    fn release(&self, conn: ConnectionId) {
        if self.router.routes.lock().unwrap().remove(&conn).is_some() {
            self.stats.connection_closed();
        }
    }
}
