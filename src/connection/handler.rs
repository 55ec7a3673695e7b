//! Connection State Machine
//!
//! One `Connection` owns everything about one client: its socket, its request
//! handler, and the read/send buffers of the request currently in flight. The
//! dispatcher feeds it events through [`Connection::transition`]; the machine
//! never blocks and never awaits.
//!
//! ## Transition Table
//!
//! ```text
//! current state                      handler
//! ──────────────────────────────────────────────────────────────────
//! SocketConnected                 ┐
//! SocketRecvIncomplete            ├─> socket ready   (read + parse loop)
//! BtreeComplete                   ┘
//! SocketSendIncomplete            ──> send resume    (continue flush)
//! BtreeIncomplete                 ──> backend wait   (await completion)
//! ShutdownServer/QuitConnection/Invalid ──> Invalid
//! ```
//!
//! After the handler runs, a connection left in `BtreeComplete` is driven
//! further: leftover buffered bytes are parsed directly, otherwise the socket
//! is read once more so it does not sit on unread data.
//!
//! ## Request Lifecycle
//!
//! ```text
//!  readable ──> read ──> parse ──┬─ PartialPacket ──> SocketRecvIncomplete
//!                                ├─ Malformed/Responded ──> flush
//!                                ├─ ComplexRequest ──> BtreeIncomplete
//!                                │        │
//!                                │        └─ RequestComplete ──> flush
//!                                │                │
//!                                │                ├─ would block ──> SocketSendIncomplete
//!                                │                └─ sent ──> BtreeComplete
//!                                └─ Quit/Shutdown ──> terminal
//! ```
//!
//! ## Buffer Management
//!
//! Buffers are allocated on the first readable event and dropped as soon as
//! the connection is idle again with nothing buffered, so idle connections
//! cost no buffer memory.

use crate::connection::buffer::{BufferLimits, IoBuffers};
use crate::connection::request::{Dispatcher, ParseOutcome, RequestHandler};
use crate::connection::socket::Socket;
use crate::connection::state::{
    Completion, ConnectionId, ConnectionState, Direction, Event, Ticket, Transition,
};
use crate::storage::Reply;
use std::io;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Internal failures of the state machine.
///
/// None of these leave [`Connection::transition`]; each is collapsed into a
/// decisive [`Transition`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Hard socket failure
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// The read buffer is full and the handler still wants more bytes
    #[error("request does not fit in the read buffer")]
    RequestTooLarge,

    /// A handler that needs buffers ran without them
    #[error("buffers missing in state {0:?}")]
    MissingBuffers(ConnectionState),

    /// A socket event addressed to a different connection
    #[error("event for {target} delivered to {conn}")]
    Misrouted {
        conn: ConnectionId,
        target: ConnectionId,
    },

    /// The request handler answered without consuming any input
    #[error("request handler responded without consuming input")]
    HandlerStalled,

    /// An event was delivered in a state that accepts none
    #[error("no transition out of state {0:?}")]
    IllegalState(ConnectionState),
}

impl ConnectionError {
    /// The decisive outcome reported for this failure.
    pub fn outcome(&self) -> Transition {
        match self {
            ConnectionError::IoError(_) | ConnectionError::RequestTooLarge => {
                Transition::QuitConnection
            }
            _ => Transition::Invalid,
        }
    }
}

/// Result of one parse attempt plus whatever it triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// A reply was fully written
    Flushed,
    /// A reply is partly written; wait for writability
    AwaitWritable,
    /// More bytes are needed from the socket
    NeedInput,
    /// Stop and report this outcome
    Done(Transition),
}

/// The per-connection state machine.
pub struct Connection<S, H> {
    id: ConnectionId,
    state: ConnectionState,
    buffers: Option<IoBuffers>,
    socket: S,
    handler: H,
    dispatcher: Arc<dyn Dispatcher>,
    limits: BufferLimits,
    next_seq: u64,
}

impl<S: Socket, H: RequestHandler> Connection<S, H> {
    /// Creates an idle connection. No buffers are allocated yet.
    pub fn new(
        id: ConnectionId,
        socket: S,
        handler: H,
        dispatcher: Arc<dyn Dispatcher>,
        limits: BufferLimits,
    ) -> Self {
        Self {
            id,
            state: ConnectionState::SocketConnected,
            buffers: None,
            socket,
            handler,
            dispatcher,
            limits,
            next_seq: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// True while a request or response is in flight.
    pub fn has_buffers(&self) -> bool {
        self.buffers.is_some()
    }

    /// Received bytes not yet consumed by the request handler.
    pub fn buffered_input(&self) -> usize {
        self.buffers.as_ref().map_or(0, |b| b.read.len())
    }

    /// Response bytes not yet written to the socket.
    pub fn pending_output(&self) -> usize {
        self.buffers.as_ref().map_or(0, |b| b.send.pending_len())
    }

    /// Applies one event and reports what the dispatcher should do next.
    ///
    /// Must be called once per delivered event and never re-entered for the
    /// same connection.
    pub fn transition(&mut self, event: Event) -> Transition {
        let result = self
            .dispatch(event)
            .and_then(|outcome| self.post_pass(outcome));

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.report(&e);
                e.outcome()
            }
        };

        if let Some(terminal) = outcome.terminal_state() {
            self.state = terminal;
            self.release_buffers();
        }
        outcome
    }

    fn dispatch(&mut self, event: Event) -> Result<Transition, ConnectionError> {
        if let Event::Socket { conn, .. } = event {
            if conn != self.id {
                return Err(ConnectionError::Misrouted {
                    conn: self.id,
                    target: conn,
                });
            }
        }

        match self.state {
            ConnectionState::SocketConnected
            | ConnectionState::SocketRecvIncomplete
            | ConnectionState::BtreeComplete => self.on_socket_ready(event),
            ConnectionState::SocketSendIncomplete => self.on_send_resume(event),
            ConnectionState::BtreeIncomplete { ticket } => self.on_backend_wait(ticket, event),
            state => Err(ConnectionError::IllegalState(state)),
        }
    }

    /// Keeps a connection that finished a response moving.
    fn post_pass(&mut self, mut outcome: Transition) -> Result<Transition, ConnectionError> {
        while outcome == Transition::Continue && self.state == ConnectionState::BtreeComplete {
            outcome = if self.buffered_input() > 0 {
                self.drain_outstanding()?
            } else {
                self.read_loop()?
            };
        }
        Ok(outcome)
    }

    fn on_socket_ready(&mut self, event: Event) -> Result<Transition, ConnectionError> {
        match event {
            Event::Socket { direction, .. } if direction.is_readable() => self.read_loop(),
            Event::Socket { .. } => Ok(Transition::Continue),
            Event::RequestComplete(completion) => self.drop_stale(completion),
        }
    }

    fn on_send_resume(&mut self, event: Event) -> Result<Transition, ConnectionError> {
        match event {
            Event::Socket { direction, .. } if direction.is_writable() => {
                self.flush()?;
                if self.state != ConnectionState::SocketSendIncomplete {
                    self.state = ConnectionState::BtreeComplete;
                }
                Ok(Transition::Continue)
            }
            Event::Socket { .. } => Ok(Transition::Continue),
            Event::RequestComplete(completion) => self.drop_stale(completion),
        }
    }

    fn on_backend_wait(
        &mut self,
        ticket: Ticket,
        event: Event,
    ) -> Result<Transition, ConnectionError> {
        match event {
            Event::Socket { direction, .. } => {
                // One request in flight per connection; input waits in the socket.
                trace!(conn = %self.id, ?direction, "request outstanding, ignoring socket event");
                Ok(Transition::Continue)
            }
            Event::RequestComplete(completion) if completion.ticket == ticket => {
                self.on_request_complete(completion.reply)
            }
            Event::RequestComplete(completion) => self.drop_stale(completion),
        }
    }

    fn on_request_complete(&mut self, reply: Reply) -> Result<Transition, ConnectionError> {
        let state = self.state;
        let buffers = self
            .buffers
            .as_mut()
            .ok_or(ConnectionError::MissingBuffers(state))?;
        self.handler.complete(reply, &mut buffers.send);

        self.flush()?;
        if self.state != ConnectionState::SocketSendIncomplete {
            self.state = ConnectionState::BtreeComplete;
        }
        Ok(Transition::Continue)
    }

    /// Reads until the socket would block or a decisive outcome is reached.
    fn read_loop(&mut self) -> Result<Transition, ConnectionError> {
        let limits = self.limits;
        self.buffers.get_or_insert_with(|| IoBuffers::new(limits));

        loop {
            let state = self.state;
            let buffers = self
                .buffers
                .as_mut()
                .ok_or(ConnectionError::MissingBuffers(state))?;
            let spare = buffers.read.spare_mut();
            if spare.is_empty() {
                return Err(ConnectionError::RequestTooLarge);
            }

            match self.socket.try_read(spare) {
                Ok(0) => {
                    debug!(conn = %self.id, buffered = buffers.read.len(), "peer closed connection");
                    return Ok(Transition::QuitConnection);
                }
                Ok(n) => {
                    buffers.read.fill(n);
                    trace!(conn = %self.id, bytes = n, buffered = buffers.read.len(), "read data");

                    match self.parse_buffered()? {
                        Step::NeedInput | Step::Flushed => continue,
                        Step::AwaitWritable => return Ok(Transition::Continue),
                        Step::Done(outcome) => return Ok(outcome),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if self.state != ConnectionState::SocketRecvIncomplete {
                        self.release_buffers();
                        self.state = ConnectionState::SocketConnected;
                    }
                    return Ok(Transition::Continue);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Parses until input runs out, a reply blocks, or a decisive outcome.
    fn parse_buffered(&mut self) -> Result<Step, ConnectionError> {
        loop {
            match self.process_one()? {
                Step::Flushed if self.buffered_input() > 0 => continue,
                step => return Ok(step),
            }
        }
    }

    /// Parses a request left behind by the previous one, without reading.
    fn drain_outstanding(&mut self) -> Result<Transition, ConnectionError> {
        trace!(conn = %self.id, buffered = self.buffered_input(), "parsing buffered request");

        match self.process_one()? {
            Step::Flushed => {
                self.state = ConnectionState::BtreeComplete;
                Ok(Transition::Continue)
            }
            Step::AwaitWritable | Step::NeedInput => Ok(Transition::Continue),
            Step::Done(outcome) => Ok(outcome),
        }
    }

    /// One parse attempt over the read buffer and its consequences.
    fn process_one(&mut self) -> Result<Step, ConnectionError> {
        let state = self.state;
        let buffers = self
            .buffers
            .as_mut()
            .ok_or(ConnectionError::MissingBuffers(state))?;
        let before = buffers.read.len();
        let outcome = self.handler.parse(&mut buffers.read, &mut buffers.send);
        let consumed_any = buffers.read.len() < before;

        match outcome {
            ParseOutcome::Malformed => {
                if !consumed_any {
                    // Guarantees progress on input the handler refuses to skip.
                    warn!(conn = %self.id, discarded = before, "malformed input not consumed");
                    buffers.read.clear();
                }
                self.respond()
            }
            ParseOutcome::Responded if !consumed_any => Err(ConnectionError::HandlerStalled),
            ParseOutcome::Responded => self.respond(),
            ParseOutcome::PartialPacket => {
                self.state = ConnectionState::SocketRecvIncomplete;
                Ok(Step::NeedInput)
            }
            ParseOutcome::ShutdownRequested => {
                info!(conn = %self.id, "client requested server shutdown");
                Ok(Step::Done(Transition::ShutdownServer))
            }
            ParseOutcome::QuitRequested => {
                debug!(conn = %self.id, "client quit");
                Ok(Step::Done(Transition::QuitConnection))
            }
            ParseOutcome::ComplexRequest(op) => {
                let ticket = Ticket {
                    conn: self.id,
                    seq: self.next_seq,
                };
                self.next_seq += 1;
                trace!(conn = %self.id, seq = ticket.seq, op = op.name(), "submitting to backend");

                self.state = ConnectionState::BtreeIncomplete { ticket };
                self.dispatcher.submit(ticket, op);
                Ok(Step::Done(Transition::Continue))
            }
        }
    }

    fn respond(&mut self) -> Result<Step, ConnectionError> {
        self.flush()?;
        if self.state == ConnectionState::SocketSendIncomplete {
            Ok(Step::AwaitWritable)
        } else {
            Ok(Step::Flushed)
        }
    }

    /// Writes pending response bytes until done or the socket would block.
    ///
    /// On completion the state drops to `SocketConnected`; callers that need a
    /// different follow-up state set it afterwards.
    fn flush(&mut self) -> Result<(), ConnectionError> {
        let state = self.state;
        let send = &mut self
            .buffers
            .as_mut()
            .ok_or(ConnectionError::MissingBuffers(state))?
            .send;

        while !send.is_empty() {
            match self.socket.try_write(send.pending()) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    trace!(conn = %self.id, bytes = n, "wrote data");
                    send.advance(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    trace!(
                        conn = %self.id,
                        sent = send.sent(),
                        pending = send.pending_len(),
                        "send would block"
                    );
                    self.state = ConnectionState::SocketSendIncomplete;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.state = ConnectionState::SocketConnected;
        Ok(())
    }

    fn drop_stale(&self, completion: Completion) -> Result<Transition, ConnectionError> {
        debug!(
            conn = %self.id,
            seq = completion.ticket.seq,
            state = ?self.state,
            "dropping completion for a request no longer outstanding"
        );
        Ok(Transition::Continue)
    }

    fn release_buffers(&mut self) {
        if self.buffers.take().is_some() {
            trace!(conn = %self.id, "released buffers");
        }
    }

    fn report(&self, e: &ConnectionError) {
        match e {
            ConnectionError::IoError(io_err)
                if matches!(
                    io_err.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
                ) =>
            {
                debug!(conn = %self.id, error = %e, "connection reset by client")
            }
            _ if e.outcome() == Transition::Invalid => {
                error!(conn = %self.id, state = ?self.state, error = %e, "connection state machine defect")
            }
            _ => warn!(conn = %self.id, error = %e, "connection error"),
        }
    }
}

impl<S, H> Drop for Connection<S, H> {
    fn drop(&mut self) {
        if let ConnectionState::BtreeIncomplete { ticket } = self.state {
            debug!(
                conn = %self.id,
                seq = ticket.seq,
                "connection destroyed with a request outstanding"
            );
        }
        self.dispatcher.release(self.id);
    }
}

/// The socket readiness a connection in `state` is waiting for, if any.
///
/// While a backend request is outstanding the socket is not watched at all.
pub fn interest(state: ConnectionState) -> Option<Direction> {
    match state {
        ConnectionState::SocketConnected
        | ConnectionState::SocketRecvIncomplete
        | ConnectionState::BtreeComplete => Some(Direction::Read),
        ConnectionState::SocketSendIncomplete => Some(Direction::Write),
        _ => None,
    }
}
