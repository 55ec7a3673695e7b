//! Collaborator seams of the connection state machine.
//!
//! A connection depends on two things it does not implement:
//!
//! - a [`RequestHandler`] that turns buffered bytes into outcomes and formats
//!   backend replies, owned exclusively by the connection
//! - a [`Dispatcher`] that accepts backend submissions and later delivers the
//!   matching completion, shared by every connection

use crate::connection::buffer::{ReadBuffer, SendBuffer};
use crate::connection::state::{ConnectionId, Ticket};
use crate::storage::{Operation, Reply};

/// Result of one parse attempt over the read buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Bad input. An error reply is in the send buffer and at least one byte
    /// was consumed.
    Malformed,

    /// A complete request was answered synchronously; the reply is in the
    /// send buffer and the request bytes were consumed.
    Responded,

    /// The buffered bytes are a prefix of a request. Nothing was consumed.
    PartialPacket,

    /// The client asked the server to shut down.
    ShutdownRequested,

    /// The client asked to close the connection.
    QuitRequested,

    /// The request must run in the backend; its bytes were consumed.
    ComplexRequest(Operation),
}

/// Incremental request parser and response formatter for one connection.
pub trait RequestHandler {
    /// Tries to recognise one request at the front of `input`.
    ///
    /// Consumed bytes are removed with [`ReadBuffer::consume`]; trailing bytes
    /// stay buffered for the next attempt. Synchronous replies go to `output`.
    fn parse(&mut self, input: &mut ReadBuffer, output: &mut SendBuffer) -> ParseOutcome;

    /// Formats the reply of a finished backend request into `output`.
    fn complete(&mut self, reply: Reply, output: &mut SendBuffer);
}

/// Shared access to the backend, as seen by a connection.
pub trait Dispatcher: Send + Sync {
    /// Starts `op` on a backend worker. The dispatcher must later deliver a
    /// `RequestComplete` event carrying `ticket` to the connection, unless the
    /// connection has been released by then.
    fn submit(&self, ticket: Ticket, op: Operation);

    /// Called once when the connection is destroyed. Completions for `conn`
    /// arriving afterwards must be dropped.
    fn release(&self, conn: ConnectionId);
}
