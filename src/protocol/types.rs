//! Text Protocol Data Types
//!
//! TreeKV speaks a small line-oriented protocol in the spirit of memcached.
//! Every line is terminated by CRLF (`\r\n`); a `set` line is followed by a
//! data block of the announced length and its own CRLF.
//!
//! ## Requests
//!
//! ```text
//! get <key> [<key> ...]\r\n
//! set <key> <bytes>\r\n<data>\r\n
//! delete <key>\r\n
//! incr <key> <delta>\r\n
//! decr <key> <delta>\r\n
//! range <start> <end|-> [<limit>]\r\n
//! flush_all\r\n
//! stats\r\n
//! version\r\n
//! quit\r\n
//! shutdown\r\n
//! ```
//!
//! ## Responses
//!
//! ```text
//! VALUE <key> <bytes>\r\n<data>\r\n ... END\r\n
//! STORED\r\n   DELETED\r\n   NOT_FOUND\r\n   <integer>\r\n   OK\r\n
//! STAT <name> <value>\r\n ... END\r\n
//! VERSION <version>\r\n
//! ERROR\r\n   CLIENT_ERROR <reason>\r\n   SERVER_ERROR <reason>\r\n
//! ```

use crate::protocol::parser::ParseError;
use crate::storage::{Operation, Reply};
use bytes::{BufMut, Bytes, BytesMut};

/// The CRLF terminator used by every line of the protocol
pub const CRLF: &[u8] = b"\r\n";

/// A fully parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `get <key>...`
    Get { keys: Vec<Bytes> },

    /// `set <key> <bytes>` plus data block
    Set { key: Bytes, value: Bytes },

    /// `delete <key>`
    Delete { key: Bytes },

    /// `incr`/`decr`; decrements carry a negative delta
    Incr { key: Bytes, delta: i64 },

    /// `range <start> <end> [<limit>]`
    Range {
        start: Bytes,
        end: Bytes,
        limit: usize,
    },

    /// `flush_all`
    FlushAll,

    /// `stats`
    Stats,

    /// `version`
    Version,

    /// `quit`
    Quit,

    /// `shutdown`
    Shutdown,
}

impl Command {
    /// Converts a storage command into the backend operation that serves it.
    ///
    /// Returns `None` for commands the connection answers on its own.
    pub fn into_operation(self) -> Option<Operation> {
        match self {
            Command::Get { keys } => Some(Operation::Get { keys }),
            Command::Set { key, value } => Some(Operation::Set { key, value }),
            Command::Delete { key } => Some(Operation::Delete { key }),
            Command::Incr { key, delta } => Some(Operation::Incr { key, delta }),
            Command::Range { start, end, limit } => Some(Operation::Range { start, end, limit }),
            Command::FlushAll => Some(Operation::FlushAll),
            Command::Stats => Some(Operation::Stats),
            Command::Version | Command::Quit | Command::Shutdown => None,
        }
    }
}

/// A response sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Zero or more `VALUE` blocks followed by `END`
    Values(Vec<(Bytes, Bytes)>),
    Stored,
    Deleted,
    NotFound,
    Counter(i64),
    Ok,
    /// `STAT` lines followed by `END`
    Stats(Vec<(&'static str, u64)>),
    Version(&'static str),
    /// Unknown command
    Error,
    ClientError(String),
    ServerError(String),
}

impl Response {
    /// Creates a client error response.
    pub fn client_error(reason: impl Into<String>) -> Self {
        Response::ClientError(reason.into())
    }

    /// Creates a server error response.
    pub fn server_error(reason: impl Into<String>) -> Self {
        Response::ServerError(reason.into())
    }

    /// Serializes the response to wire bytes.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Number of bytes [`serialize`](Self::serialize) will produce.
    pub fn encoded_len(&self) -> usize {
        match self {
            Response::Values(entries) => {
                entries
                    .iter()
                    .map(|(k, v)| {
                        // "VALUE " key " " len CRLF data CRLF
                        6 + k.len() + 1 + decimal_len(v.len() as u64) + 2 + v.len() + 2
                    })
                    .sum::<usize>()
                    + 5
            }
            Response::Stored => 8,
            Response::Deleted => 9,
            Response::NotFound => 11,
            Response::Counter(n) => n.to_string().len() + 2,
            Response::Ok => 4,
            Response::Stats(stats) => {
                stats
                    .iter()
                    .map(|(name, value)| 5 + name.len() + 1 + decimal_len(*value) + 2)
                    .sum::<usize>()
                    + 5
            }
            Response::Version(v) => 8 + v.len() + 2,
            Response::Error => 7,
            Response::ClientError(reason) => 13 + reason.len() + 2,
            Response::ServerError(reason) => 13 + reason.len() + 2,
        }
    }

    fn write_to(&self, buf: &mut BytesMut) {
        match self {
            Response::Values(entries) => {
                for (key, value) in entries {
                    buf.put_slice(b"VALUE ");
                    buf.put_slice(key);
                    buf.put_u8(b' ');
                    buf.put_slice(value.len().to_string().as_bytes());
                    buf.put_slice(CRLF);
                    buf.put_slice(value);
                    buf.put_slice(CRLF);
                }
                buf.put_slice(b"END\r\n");
            }
            Response::Stored => buf.put_slice(b"STORED\r\n"),
            Response::Deleted => buf.put_slice(b"DELETED\r\n"),
            Response::NotFound => buf.put_slice(b"NOT_FOUND\r\n"),
            Response::Counter(n) => {
                buf.put_slice(n.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            Response::Ok => buf.put_slice(b"OK\r\n"),
            Response::Stats(stats) => {
                for (name, value) in stats {
                    buf.put_slice(b"STAT ");
                    buf.put_slice(name.as_bytes());
                    buf.put_u8(b' ');
                    buf.put_slice(value.to_string().as_bytes());
                    buf.put_slice(CRLF);
                }
                buf.put_slice(b"END\r\n");
            }
            Response::Version(v) => {
                buf.put_slice(b"VERSION ");
                buf.put_slice(v.as_bytes());
                buf.put_slice(CRLF);
            }
            Response::Error => buf.put_slice(b"ERROR\r\n"),
            Response::ClientError(reason) => {
                buf.put_slice(b"CLIENT_ERROR ");
                buf.put_slice(reason.as_bytes());
                buf.put_slice(CRLF);
            }
            Response::ServerError(reason) => {
                buf.put_slice(b"SERVER_ERROR ");
                buf.put_slice(reason.as_bytes());
                buf.put_slice(CRLF);
            }
        }
    }
}

impl From<Reply> for Response {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Values(entries) => Response::Values(entries),
            Reply::Stored => Response::Stored,
            Reply::Deleted => Response::Deleted,
            Reply::NotFound => Response::NotFound,
            Reply::Counter(n) => Response::Counter(n),
            Reply::Ok => Response::Ok,
            Reply::Stats(stats) => Response::Stats(vec![
                ("curr_items", stats.keys),
                ("cmd_get", stats.get_ops),
                ("cmd_set", stats.set_ops),
                ("cmd_delete", stats.del_ops),
                ("cmd_range", stats.scan_ops),
            ]),
            Reply::Failed(e) => Response::server_error(e.to_string()),
        }
    }
}

impl From<&ParseError> for Response {
    fn from(error: &ParseError) -> Self {
        match error {
            ParseError::UnknownCommand(_) | ParseError::EmptyLine => Response::Error,
            ParseError::ObjectTooLarge { .. } => Response::server_error(error.to_string()),
            other => Response::client_error(other.to_string()),
        }
    }
}

fn decimal_len(mut n: u64) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}
