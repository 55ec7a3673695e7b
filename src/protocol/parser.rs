//! Incremental Text Protocol Parser
//!
//! The parser looks at whatever bytes the connection has buffered and returns
//! one of:
//! - `Ok(Some((command, consumed)))` - a complete request occupying `consumed` bytes
//! - `Ok(None)` - the request is not complete yet, keep the bytes and read more
//! - `Err(Rejected { error, consumed })` - invalid input spanning `consumed` bytes
//!
//! The parser never consumes anything itself; the caller advances its buffer.
//! A rejection always spans at least one byte, so a caller that skips
//! `consumed` bytes after every rejection cannot stall on bad input.
//!
//! A `set` whose data block cannot fit is rejected as soon as its header line
//! is complete. The data block still follows on the wire; the caller must
//! skip [`ParseError::trailing_bytes`] more bytes so it is never read as
//! commands.

use crate::protocol::types::{Command, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Maximum key length in bytes (same as memcached)
pub const MAX_KEY_LEN: usize = 250;

/// Maximum length of a command line without its terminator
pub const MAX_LINE_LEN: usize = 2048;

/// Number of entries a `range` returns when no limit is given
pub const DEFAULT_RANGE_LIMIT: usize = 100;

/// Largest data block a `set` may announce (1 MiB)
pub const MAX_VALUE_LEN: usize = 1024 * 1024;

/// Reasons a request can be rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line held no tokens
    #[error("empty command line")]
    EmptyLine,

    /// The command name is not recognised
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Too few or too many arguments
    #[error("wrong number of arguments for '{0}'")]
    WrongArity(&'static str),

    /// Key is too long or contains control bytes
    #[error("invalid key")]
    InvalidKey,

    /// A numeric argument did not parse
    #[error("invalid numeric argument: {0}")]
    InvalidNumber(String),

    /// The data block after `set` was not terminated by CRLF
    #[error("bad data chunk")]
    BadDataChunk,

    /// No CRLF within the maximum line length
    #[error("line too long")]
    LineTooLong,

    /// A `set` announced a data block larger than the request may be
    #[error("object too large for buffer")]
    ObjectTooLarge { declared: usize },
}

impl ParseError {
    /// Bytes still on the wire after the rejected line that belong to it.
    pub fn trailing_bytes(&self) -> usize {
        match self {
            ParseError::ObjectTooLarge { declared } => declared.saturating_add(CRLF.len()),
            _ => 0,
        }
    }
}

/// A rejected request and the number of bytes it occupied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub error: ParseError,
    pub consumed: usize,
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, Rejected>;

/// Parser for the TreeKV text protocol.
///
/// # Example
///
/// ```
/// use treekv::protocol::{CommandParser, Command};
/// use bytes::Bytes;
///
/// let parser = CommandParser::new();
/// let (command, consumed) = parser.parse(b"get foo\r\n").unwrap().unwrap();
/// assert_eq!(command, Command::Get { keys: vec![Bytes::from("foo")] });
/// assert_eq!(consumed, 9);
///
/// // Incomplete input asks for more bytes
/// assert!(parser.parse(b"get f").unwrap().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct CommandParser {
    max_line_len: usize,
    max_value_len: usize,
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandParser {
    /// Creates a parser with the default line limit.
    pub fn new() -> Self {
        Self {
            max_line_len: MAX_LINE_LEN,
            max_value_len: MAX_VALUE_LEN,
        }
    }

    /// Attempts to parse one request from the front of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(Command, usize)>> {
        self.parse_within(buf, usize::MAX)
    }

    /// Like [`parse`](Self::parse), but also rejects any `set` whose complete
    /// request would be longer than `capacity` bytes.
    pub fn parse_within(
        &self,
        buf: &[u8],
        capacity: usize,
    ) -> ParseResult<Option<(Command, usize)>> {
        let line_len = match find_crlf(buf) {
            Some(pos) => pos,
            None if buf.len() > self.max_line_len => {
                return Err(Rejected {
                    error: ParseError::LineTooLong,
                    consumed: buf.len(),
                });
            }
            None => return Ok(None),
        };
        let line_end = line_len + CRLF.len();
        let reject = |error| Rejected {
            error,
            consumed: line_end,
        };

        if line_len > self.max_line_len {
            return Err(reject(ParseError::LineTooLong));
        }

        let mut tokens = buf[..line_len]
            .split(|b| b.is_ascii_whitespace())
            .filter(|t| !t.is_empty());

        let name = tokens.next().ok_or_else(|| reject(ParseError::EmptyLine))?;
        let args: Vec<&[u8]> = tokens.collect();

        let command = if name.eq_ignore_ascii_case(b"get") {
            if args.is_empty() {
                return Err(reject(ParseError::WrongArity("get")));
            }
            let keys = args
                .iter()
                .map(|k| parse_key(k))
                .collect::<Result<Vec<_>, _>>()
                .map_err(reject)?;
            Command::Get { keys }
        } else if name.eq_ignore_ascii_case(b"set") {
            let [key, len] = args[..] else {
                return Err(reject(ParseError::WrongArity("set")));
            };
            let key = parse_key(key).map_err(reject)?;
            let len: usize = parse_number(len).map_err(reject)?;

            if len > self.max_value_len {
                return Err(reject(ParseError::ObjectTooLarge { declared: len }));
            }
            let data_end = line_end + len;
            let total = data_end + CRLF.len();
            if total > capacity {
                return Err(reject(ParseError::ObjectTooLarge { declared: len }));
            }
            if buf.len() < total {
                return Ok(None);
            }
            if &buf[data_end..total] != CRLF {
                return Err(Rejected {
                    error: ParseError::BadDataChunk,
                    consumed: total,
                });
            }

            let value = Bytes::copy_from_slice(&buf[line_end..data_end]);
            return Ok(Some((Command::Set { key, value }, total)));
        } else if name.eq_ignore_ascii_case(b"delete") {
            let [key] = args[..] else {
                return Err(reject(ParseError::WrongArity("delete")));
            };
            Command::Delete {
                key: parse_key(key).map_err(reject)?,
            }
        } else if name.eq_ignore_ascii_case(b"incr") || name.eq_ignore_ascii_case(b"decr") {
            let decrement = name.eq_ignore_ascii_case(b"decr");
            let [key, delta] = args[..] else {
                return Err(reject(ParseError::WrongArity(if decrement {
                    "decr"
                } else {
                    "incr"
                })));
            };
            let key = parse_key(key).map_err(reject)?;
            let delta: i64 = parse_number(delta).map_err(reject)?;
            if delta < 0 {
                return Err(reject(ParseError::InvalidNumber(delta.to_string())));
            }
            Command::Incr {
                key,
                delta: if decrement { -delta } else { delta },
            }
        } else if name.eq_ignore_ascii_case(b"range") {
            let (start, end, limit) = match args[..] {
                [start, end] => (start, end, None),
                [start, end, limit] => (start, end, Some(limit)),
                _ => return Err(reject(ParseError::WrongArity("range"))),
            };
            let start = parse_key(start).map_err(reject)?;
            let end = if end == b"-" {
                Bytes::new()
            } else {
                parse_key(end).map_err(reject)?
            };
            let limit = match limit {
                Some(limit) => parse_number(limit).map_err(reject)?,
                None => DEFAULT_RANGE_LIMIT,
            };
            Command::Range { start, end, limit }
        } else if name.eq_ignore_ascii_case(b"flush_all") {
            no_args(&args, "flush_all").map_err(reject)?;
            Command::FlushAll
        } else if name.eq_ignore_ascii_case(b"stats") {
            no_args(&args, "stats").map_err(reject)?;
            Command::Stats
        } else if name.eq_ignore_ascii_case(b"version") {
            no_args(&args, "version").map_err(reject)?;
            Command::Version
        } else if name.eq_ignore_ascii_case(b"quit") {
            no_args(&args, "quit").map_err(reject)?;
            Command::Quit
        } else if name.eq_ignore_ascii_case(b"shutdown") {
            no_args(&args, "shutdown").map_err(reject)?;
            Command::Shutdown
        } else {
            return Err(reject(ParseError::UnknownCommand(
                String::from_utf8_lossy(name).into_owned(),
            )));
        };

        Ok(Some((command, line_end)))
    }
}

fn parse_key(raw: &[u8]) -> Result<Bytes, ParseError> {
    if raw.is_empty() || raw.len() > MAX_KEY_LEN || raw.iter().any(|b| b.is_ascii_control()) {
        return Err(ParseError::InvalidKey);
    }
    Ok(Bytes::copy_from_slice(raw))
}

fn parse_number<T: std::str::FromStr>(raw: &[u8]) -> Result<T, ParseError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError::InvalidNumber(String::from_utf8_lossy(raw).into_owned()))
}

fn no_args(args: &[&[u8]], name: &'static str) -> Result<(), ParseError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(ParseError::WrongArity(name))
    }
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Parses a single request with a default parser.
pub fn parse_command(buf: &[u8]) -> ParseResult<Option<(Command, usize)>> {
    CommandParser::new().parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_parse_get() {
        let (cmd, consumed) = parse_command(b"get foo\r\n").unwrap().unwrap();
        assert_eq!(cmd, Command::Get { keys: vec![key("foo")] });
        assert_eq!(consumed, 9);
    }

    #[test]
    fn test_parse_multi_get() {
        let (cmd, _) = parse_command(b"GET a  b\tc\r\n").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Get {
                keys: vec![key("a"), key("b"), key("c")]
            }
        );
    }

    #[test]
    fn test_parse_get_incomplete() {
        assert!(parse_command(b"get f").unwrap().is_none());
        assert!(parse_command(b"get foo\r").unwrap().is_none());
        assert!(parse_command(b"").unwrap().is_none());
    }

    #[test]
    fn test_parse_leaves_trailing_bytes() {
        let input = b"get a\r\nget b\r\n";
        let (_, consumed) = parse_command(input).unwrap().unwrap();
        assert_eq!(consumed, 7);
        let (cmd, _) = parse_command(&input[consumed..]).unwrap().unwrap();
        assert_eq!(cmd, Command::Get { keys: vec![key("b")] });
    }

    #[test]
    fn test_parse_set() {
        let input = b"set name 4\r\nAriz\r\n";
        let (cmd, consumed) = parse_command(input).unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Set {
                key: key("name"),
                value: key("Ariz")
            }
        );
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_parse_set_binary_value() {
        let input = b"set bin 5\r\na\r\n\x00b\r\n";
        let (cmd, _) = parse_command(input).unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Set {
                key: key("bin"),
                value: Bytes::from(&b"a\r\n\x00b"[..])
            }
        );
    }

    #[test]
    fn test_parse_set_waits_for_data_block() {
        assert!(parse_command(b"set name 4\r\n").unwrap().is_none());
        assert!(parse_command(b"set name 4\r\nAr").unwrap().is_none());
        assert!(parse_command(b"set name 4\r\nAriz\r").unwrap().is_none());
    }

    #[test]
    fn test_parse_set_bad_data_chunk() {
        let input = b"set name 2\r\nAriz\r\n";
        let rejected = parse_command(input).unwrap_err();
        assert_eq!(rejected.error, ParseError::BadDataChunk);
        assert_eq!(rejected.consumed, 16);
    }

    #[test]
    fn test_parse_delete_and_counters() {
        let (cmd, _) = parse_command(b"delete k\r\n").unwrap().unwrap();
        assert_eq!(cmd, Command::Delete { key: key("k") });

        let (cmd, _) = parse_command(b"incr n 5\r\n").unwrap().unwrap();
        assert_eq!(cmd, Command::Incr { key: key("n"), delta: 5 });

        let (cmd, _) = parse_command(b"decr n 3\r\n").unwrap().unwrap();
        assert_eq!(cmd, Command::Incr { key: key("n"), delta: -3 });
    }

    #[test]
    fn test_parse_range() {
        let (cmd, _) = parse_command(b"range a z\r\n").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Range {
                start: key("a"),
                end: key("z"),
                limit: DEFAULT_RANGE_LIMIT
            }
        );

        let (cmd, _) = parse_command(b"range a - 5\r\n").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Range {
                start: key("a"),
                end: Bytes::new(),
                limit: 5
            }
        );
    }

    #[test]
    fn test_parse_control_commands() {
        assert_eq!(parse_command(b"version\r\n").unwrap().unwrap().0, Command::Version);
        assert_eq!(parse_command(b"flush_all\r\n").unwrap().unwrap().0, Command::FlushAll);
        assert_eq!(parse_command(b"stats\r\n").unwrap().unwrap().0, Command::Stats);
        assert_eq!(parse_command(b"QUIT\r\n").unwrap().unwrap().0, Command::Quit);
        assert_eq!(
            parse_command(b"shutdown\r\n").unwrap().unwrap().0,
            Command::Shutdown
        );
    }

    #[test]
    fn test_rejections_consume_the_line() {
        let cases: [(&[u8], ParseError); 6] = [
            (b"frobnicate\r\n", ParseError::UnknownCommand("frobnicate".to_string())),
            (b"\r\n", ParseError::EmptyLine),
            (b"get\r\n", ParseError::WrongArity("get")),
            (b"quit now\r\n", ParseError::WrongArity("quit")),
            (b"incr n x\r\n", ParseError::InvalidNumber("x".to_string())),
            (b"set k -1\r\n", ParseError::InvalidNumber("-1".to_string())),
        ];
        for (input, error) in cases {
            let rejected = parse_command(input).unwrap_err();
            assert_eq!(rejected.error, error);
            assert_eq!(rejected.consumed, input.len());
        }
    }

    #[test]
    fn test_invalid_key() {
        let long = format!("get {}\r\n", "k".repeat(MAX_KEY_LEN + 1));
        let rejected = parse_command(long.as_bytes()).unwrap_err();
        assert_eq!(rejected.error, ParseError::InvalidKey);

        let rejected = parse_command(b"get a\x01b\r\n").unwrap_err();
        assert_eq!(rejected.error, ParseError::InvalidKey);
    }

    #[test]
    fn test_set_length_near_usize_max_is_rejected() {
        for len in [usize::MAX, usize::MAX - 1] {
            let input = format!("set k {}\r\n", len);
            let rejected = parse_command(input.as_bytes()).unwrap_err();
            assert_eq!(rejected.error, ParseError::ObjectTooLarge { declared: len });
            assert_eq!(rejected.consumed, input.len());
            assert_eq!(rejected.error.trailing_bytes(), usize::MAX);
        }

        // One past usize::MAX is not a number at all
        let rejected = parse_command(b"set k 18446744073709551616\r\n").unwrap_err();
        assert!(matches!(rejected.error, ParseError::InvalidNumber(_)));
    }

    #[test]
    fn test_set_length_limits() {
        let at_limit = format!("set k {}\r\n", MAX_VALUE_LEN);
        assert!(parse_command(at_limit.as_bytes()).unwrap().is_none());

        let over = format!("set k {}\r\n", MAX_VALUE_LEN + 1);
        let rejected = parse_command(over.as_bytes()).unwrap_err();
        assert_eq!(
            rejected.error,
            ParseError::ObjectTooLarge {
                declared: MAX_VALUE_LEN + 1
            }
        );
        assert_eq!(rejected.error.trailing_bytes(), MAX_VALUE_LEN + 3);
    }

    #[test]
    fn test_parse_within_capacity() {
        let parser = CommandParser::new();

        // "set k 3\r\n" + "abc\r\n" is exactly 14 bytes
        let (cmd, consumed) = parser.parse_within(b"set k 3\r\nabc\r\n", 14).unwrap().unwrap();
        assert_eq!(cmd, Command::Set { key: key("k"), value: key("abc") });
        assert_eq!(consumed, 14);

        let rejected = parser.parse_within(b"set k 4\r\nab", 14).unwrap_err();
        assert_eq!(rejected.error, ParseError::ObjectTooLarge { declared: 4 });
        assert_eq!(rejected.consumed, 9);
        assert_eq!(rejected.error.trailing_bytes(), 6);

        // Only set carries a data block
        assert!(parser.parse_within(b"get k\r\n", 8).unwrap().is_some());
    }

    #[test]
    fn test_range_limit_zero() {
        let (cmd, _) = parse_command(b"range a z 0\r\n").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Range {
                start: key("a"),
                end: key("z"),
                limit: 0
            }
        );
    }

    #[test]
    fn test_counter_delta_bounds() {
        let input = format!("incr n {}\r\n", i64::MAX);
        let (cmd, _) = parse_command(input.as_bytes()).unwrap().unwrap();
        assert_eq!(cmd, Command::Incr { key: key("n"), delta: i64::MAX });

        let input = format!("decr n {}\r\n", i64::MAX);
        let (cmd, _) = parse_command(input.as_bytes()).unwrap().unwrap();
        assert_eq!(cmd, Command::Incr { key: key("n"), delta: -i64::MAX });

        // i64::MIN is negative and its magnitude does not fit a delta
        let input = format!("incr n {}\r\n", i64::MIN);
        let rejected = parse_command(input.as_bytes()).unwrap_err();
        assert_eq!(rejected.error, ParseError::InvalidNumber(i64::MIN.to_string()));

        let input = format!("decr n {}\r\n", i64::MAX as u64 + 1);
        let rejected = parse_command(input.as_bytes()).unwrap_err();
        assert!(matches!(rejected.error, ParseError::InvalidNumber(_)));
    }

    #[test]
    fn test_line_too_long_without_crlf() {
        let input = vec![b'a'; MAX_LINE_LEN + 1];
        let rejected = parse_command(&input).unwrap_err();
        assert_eq!(rejected.error, ParseError::LineTooLong);
        assert_eq!(rejected.consumed, input.len());
    }
}
