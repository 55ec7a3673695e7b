//! Text Protocol Implementation
//!
//! This module implements the line-oriented request protocol TreeKV speaks.
//!
//! ## Modules
//!
//! - `types`: `Command` and `Response`, plus response serialization
//! - `parser`: incremental parser for buffered request bytes
//!
//! ## Example
//!
//! ```
//! use treekv::protocol::{parse_command, Command, Response};
//!
//! let (command, consumed) = parse_command(b"delete name\r\n").unwrap().unwrap();
//! assert!(matches!(command, Command::Delete { .. }));
//! assert_eq!(consumed, 13);
//!
//! assert_eq!(&Response::Deleted.serialize()[..], b"DELETED\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_command, CommandParser, ParseError, ParseResult, Rejected};
pub use types::{Command, Response};
