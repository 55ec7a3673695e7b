//! Connection Module
//!
//! This module holds the per-connection state machine of TreeKV. A connection
//! is driven entirely by events: the dispatcher tells it the socket is
//! readable or writable, or that a backend request finished, and the
//! connection reacts with non-blocking reads and writes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Dispatcher / driver task                    │
//! │                    (server module)                          │
//! └──────────────┬──────────────────────────────▲───────────────┘
//!                │ Event                        │ submit(ticket, op)
//!                ▼                              │
//! ┌─────────────────────────────────────────────┴───────────────┐
//! │                     Connection                              │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ ReadBuffer  │───>│ Request     │───>│ SendBuffer  │      │
//! │  │             │    │ Handler     │    │             │      │
//! │  └──────▲──────┘    └─────────────┘    └──────┬──────┘      │
//! │         │ try_read                    try_write │           │
//! └─────────┼───────────────────────────────────────┼───────────┘
//!           │              Socket                   ▼
//! ```
//!
//! ## Modules
//!
//! - `buffer`: fixed-capacity read and send buffers
//! - `socket`: the non-blocking socket seam
//! - `state`: states, events, tickets and outcomes
//! - `request`: the request handler and dispatcher seams
//! - `handler`: the state machine itself

pub mod buffer;
pub mod handler;
pub mod request;
pub mod socket;
pub mod state;

// Re-export commonly used types
pub use buffer::{BufferError, BufferLimits, IoBuffers, ReadBuffer, SendBuffer};
pub use handler::{interest, Connection, ConnectionError};
pub use request::{Dispatcher, ParseOutcome, RequestHandler};
pub use socket::Socket;
pub use state::{
    Completion, ConnectionId, ConnectionState, Direction, Event, Ticket, Transition,
};
