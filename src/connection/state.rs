//! States, events and outcomes of the connection state machine.

use crate::storage::Reply;
use std::fmt;

/// Identity of one accepted connection.
///
/// Identifiers are allocated from a monotonically increasing counter and are
/// never reused, so an identifier that is no longer registered reliably marks
/// a connection that has been torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Names one backend submission: the connection plus its request sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub conn: ConnectionId,
    pub seq: u64,
}

/// The result of a backend operation, addressed to the submitting request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub ticket: Ticket,
    pub reply: Reply,
}

/// Socket readiness carried by a socket event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
    Both,
}

impl Direction {
    pub fn is_readable(self) -> bool {
        matches!(self, Direction::Read | Direction::Both)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Direction::Write | Direction::Both)
    }
}

/// A fact delivered to a connection by its dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The socket became readable and/or writable
    Socket {
        conn: ConnectionId,
        direction: Direction,
    },

    /// A backend request finished
    RequestComplete(Completion),
}

impl Event {
    /// The connection this event is addressed to.
    pub fn target(&self) -> ConnectionId {
        match self {
            Event::Socket { conn, .. } => *conn,
            Event::RequestComplete(completion) => completion.ticket.conn,
        }
    }
}

/// Where a connection is in its lifecycle.
///
/// Only `BtreeIncomplete` carries data: the ticket of the single outstanding
/// backend request. The send cursor lives in the send buffer, which exists
/// exactly while a request or response is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Idle; no buffers allocated
    SocketConnected,
    /// A partial request is buffered
    SocketRecvIncomplete,
    /// A response is partly written; waiting for writability
    SocketSendIncomplete,
    /// A request is executing in the backend
    BtreeIncomplete { ticket: Ticket },
    /// A response finished sending; buffered input may remain
    BtreeComplete,
    /// Terminal: the client asked the server to stop
    ShutdownServer,
    /// Terminal: the connection is finished
    QuitConnection,
    /// Terminal: a contract violation was detected
    Invalid,
}

impl ConnectionState {
    /// True for states no event can leave.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::ShutdownServer | ConnectionState::QuitConnection | ConnectionState::Invalid
        )
    }
}

/// What the dispatcher should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Keep delivering events
    Continue,
    /// Stop the whole server
    ShutdownServer,
    /// Tear down this connection
    QuitConnection,
    /// A defect was detected; tear down this connection
    Invalid,
}

impl Transition {
    /// The terminal state matching a decisive outcome.
    pub(crate) fn terminal_state(self) -> Option<ConnectionState> {
        match self {
            Transition::Continue => None,
            Transition::ShutdownServer => Some(ConnectionState::ShutdownServer),
            Transition::QuitConnection => Some(ConnectionState::QuitConnection),
            Transition::Invalid => Some(ConnectionState::Invalid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_flags() {
        assert!(Direction::Read.is_readable());
        assert!(!Direction::Read.is_writable());
        assert!(Direction::Write.is_writable());
        assert!(Direction::Both.is_readable() && Direction::Both.is_writable());
    }

    #[test]
    fn test_event_target() {
        let conn = ConnectionId::new(7);
        let event = Event::RequestComplete(Completion {
            ticket: Ticket { conn, seq: 1 },
            reply: Reply::Stored,
        });
        assert_eq!(event.target(), conn);
        assert_eq!(conn.to_string(), "conn-7");
    }

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::QuitConnection.is_terminal());
        assert!(!ConnectionState::BtreeComplete.is_terminal());
        assert_eq!(
            Transition::ShutdownServer.terminal_state(),
            Some(ConnectionState::ShutdownServer)
        );
        assert_eq!(Transition::Continue.terminal_state(), None);
    }
}
