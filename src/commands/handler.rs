//! Command Handler
//!
//! `CommandHandler` is the request handler a connection drives. It parses the
//! connection's read buffer in place, answers what it can on the spot and turns
//! storage commands into backend operations.
//!
//! ## Outcome Mapping
//!
//! ```text
//! parser result                 buffer effect              outcome
//! ───────────────────────────────────────────────────────────────────────────
//! Ok(None), buffer has room     none                       PartialPacket
//! Ok(None), buffer full         discard through newline    Malformed
//! Err(Rejected)                 consume span, error reply  Malformed
//! Ok(Some(version))             consume, VERSION reply     Responded
//! Ok(Some(quit|shutdown))       consume                    Quit/ShutdownRequested
//! Ok(Some(storage command))     consume                    ComplexRequest(op)
//! ```
//!
//! ## Discarding
//!
//! Some rejected input is longer than what is buffered: the data block of a
//! `set` too large for the read buffer, or a line that never ended inside it.
//! The handler remembers how much is left and throws it away as it arrives,
//! so none of it is ever parsed as a command.

use crate::connection::{ParseOutcome, ReadBuffer, RequestHandler, SendBuffer};
use crate::protocol::{Command, CommandParser, ParseError, Response};
use crate::storage::Reply;
use tracing::{error, trace, warn};

/// Input already rejected that has not arrived yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Discard {
    #[default]
    Nothing,
    /// The rest of a rejected data block
    Bytes(usize),
    /// Everything up to and including the next newline
    Line,
}

/// Parses requests and formats replies for one connection.
#[derive(Debug, Clone, Default)]
pub struct CommandHandler {
    parser: CommandParser,
    discard: Discard,
}

impl CommandHandler {
    /// Creates a new command handler.
    pub fn new() -> Self {
        Self {
            parser: CommandParser::new(),
            discard: Discard::Nothing,
        }
    }

    /// Drops as much pending rejected input as is buffered.
    fn skip_discarded(&mut self, input: &mut ReadBuffer) {
        match self.discard {
            Discard::Nothing => {}
            Discard::Bytes(left) => {
                let n = left.min(input.len());
                input.consume(n);
                trace!(skipped = n, left = left - n, "discarding rejected data");
                self.discard = if n == left {
                    Discard::Nothing
                } else {
                    Discard::Bytes(left - n)
                };
            }
            Discard::Line => match input.as_slice().iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    input.consume(pos + 1);
                    self.discard = Discard::Nothing;
                }
                None => input.clear(),
            },
        }
    }

    fn dispatch(&self, command: Command, output: &mut SendBuffer) -> ParseOutcome {
        match command {
            Command::Version => {
                write_response(output, &Response::Version(crate::VERSION));
                ParseOutcome::Responded
            }
            Command::Quit => ParseOutcome::QuitRequested,
            Command::Shutdown => ParseOutcome::ShutdownRequested,
            storage => match storage.into_operation() {
                Some(op) => ParseOutcome::ComplexRequest(op),
                None => {
                    write_response(output, &Response::Error);
                    ParseOutcome::Malformed
                }
            },
        }
    }
}

impl RequestHandler for CommandHandler {
    fn parse(&mut self, input: &mut ReadBuffer, output: &mut SendBuffer) -> ParseOutcome {
        self.skip_discarded(input);
        if self.discard != Discard::Nothing {
            return ParseOutcome::PartialPacket;
        }

        match self.parser.parse_within(input.as_slice(), input.capacity()) {
            Ok(Some((command, consumed))) => {
                trace!(
                    consumed,
                    remaining = input.len().saturating_sub(consumed),
                    "parsed command"
                );
                input.consume(consumed);
                self.dispatch(command, output)
            }
            Ok(None) if input.is_full() => {
                warn!(
                    capacity = input.capacity(),
                    "request line does not fit in the read buffer"
                );
                input.clear();
                self.discard = Discard::Line;
                write_response(output, &Response::from(&ParseError::LineTooLong));
                ParseOutcome::Malformed
            }
            Ok(None) => ParseOutcome::PartialPacket,
            Err(rejected) => {
                warn!(error = %rejected.error, consumed = rejected.consumed, "rejected request");
                input.consume(rejected.consumed.max(1));
                let trailing = rejected.error.trailing_bytes();
                if trailing > 0 {
                    self.discard = Discard::Bytes(trailing);
                    self.skip_discarded(input);
                }
                write_response(output, &Response::from(&rejected.error));
                ParseOutcome::Malformed
            }
        }
    }

    fn complete(&mut self, reply: Reply, output: &mut SendBuffer) {
        write_response(output, &Response::from(reply));
    }
}

/// Queues a response, replacing it with an error if it cannot fit.
fn write_response(output: &mut SendBuffer, response: &Response) {
    if let Err(e) = output.put(&response.serialize()) {
        warn!(error = %e, "response does not fit in the send buffer");
        let fallback = Response::server_error("response too large").serialize();
        if let Err(e) = output.put(&fallback) {
            error!(error = %e, "send buffer cannot hold an error reply");
        }
    }
}
