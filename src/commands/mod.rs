//! Command Handler Module
//!
//! This module is the request handler each connection owns. It sits between
//! the connection's buffers and the storage backend.
//!
//! ## Architecture
//!
//! ```text
//! Client bytes
//!       │
//!       ▼
//! ┌─────────────────┐
//! │   ReadBuffer    │  (connection module)
//! └────────┬────────┘
//!          │ parse()
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Parse        │
//! │  - Answer sync  │──────> SendBuffer
//! │  - Offload      │
//! └────────┬────────┘
//!          │ ComplexRequest(Operation)
//!          ▼
//! ┌─────────────────┐
//! │   Dispatcher    │  (server module)
//! └─────────────────┘
//! ```
//!
//! ## Commands
//!
//! - Offloaded to the backend: `get`, `set`, `delete`, `incr`, `decr`, `range`
//! - Answered synchronously: `version`
//! - Control: `quit`, `shutdown`

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;
