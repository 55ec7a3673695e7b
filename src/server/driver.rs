//! Per-connection driver task.
//!
//! Each accepted stream gets one task that owns its [`Connection`]. The task
//! turns socket readiness and backend completions into events, one at a time,
//! so `transition` is never re-entered for the same connection.
//!
//! ```text
//!            interest(state)
//!   ┌──────────────┬──────────────────┬──────────────────┐
//!   │ Read         │ Write            │ None             │
//!   │ ready(READ)  │ ready(WRITE)     │ (backend busy)   │
//!   │      or      │      or          │                  │
//!   │ completion   │ completion       │ completion only  │
//!   └──────┬───────┴────────┬─────────┴────────┬─────────┘
//!          └────────────────┼──────────────────┘
//!                           ▼
//!                  conn.transition(event)
//! ```

use crate::commands::CommandHandler;
use crate::connection::{
    interest, BufferLimits, Completion, Connection, Direction, Dispatcher, Event, Transition,
};
use crate::server::dispatcher::ServerDispatcher;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{Interest, Ready};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Maps what tokio reported back onto the state machine's vocabulary.
fn direction_of(ready: Ready) -> Option<Direction> {
    match (ready.is_readable(), ready.is_writable()) {
        (true, true) => Some(Direction::Both),
        (true, false) => Some(Direction::Read),
        (false, true) => Some(Direction::Write),
        (false, false) => None,
    }
}

fn tokio_interest(direction: Direction) -> Interest {
    match direction {
        Direction::Read => Interest::READABLE,
        Direction::Write => Interest::WRITABLE,
        Direction::Both => Interest::READABLE | Interest::WRITABLE,
    }
}

/// Runs a connection until it reaches a decisive outcome.
pub async fn drive(
    mut conn: Connection<TcpStream, CommandHandler>,
    mut completions: mpsc::UnboundedReceiver<Completion>,
) -> Transition {
    loop {
        let event = match interest(conn.state()) {
            Some(wanted) => {
                tokio::select! {
                    ready = conn.socket().ready(tokio_interest(wanted)) => match ready {
                        Ok(ready) => match direction_of(ready) {
                            Some(direction) => Event::Socket { conn: conn.id(), direction },
                            None => continue,
                        },
                        Err(e) => {
                            warn!(conn = %conn.id(), error = %e, "readiness poll failed");
                            return Transition::QuitConnection;
                        }
                    },
                    completion = completions.recv() => match completion {
                        Some(completion) => Event::RequestComplete(completion),
                        None => return Transition::QuitConnection,
                    },
                }
            }
            None => match completions.recv().await {
                Some(completion) => Event::RequestComplete(completion),
                None => return Transition::QuitConnection,
            },
        };

        match conn.transition(event) {
            Transition::Continue => {}
            outcome => return outcome,
        }
    }
}

/// Owns one accepted stream from registration to teardown.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Arc<ServerDispatcher>,
    limits: BufferLimits,
) {
    let registration = dispatcher.register();
    let id = registration.id;
    info!(conn = %id, client = %addr, "Client connected");

    let seam: Arc<dyn Dispatcher> = dispatcher.clone();
    let conn = Connection::new(id, stream, CommandHandler::new(), seam, limits);

    let outcome = drive(conn, registration.completions).await;
    match outcome {
        Transition::ShutdownServer => {
            info!(conn = %id, client = %addr, "Client requested server shutdown");
            dispatcher.request_shutdown();
        }
        Transition::Invalid => {
            warn!(conn = %id, client = %addr, "Connection closed after an internal error");
        }
        _ => debug!(conn = %id, ?outcome, "connection finished"),
    }
    info!(conn = %id, client = %addr, "Client disconnected");
}
