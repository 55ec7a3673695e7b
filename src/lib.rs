//! # TreeKV - An Event-Driven Key-Value Server Backed by a B-Tree
//!
//! TreeKV serves an ordered in-memory key-value store over a small
//! memcached-style text protocol. Each client connection is an explicit state
//! machine: it reads and writes its socket without ever blocking, and hands
//! storage work to a pool of backend workers whose results come back as
//! events.
//!
//! ## Features
//!
//! - **Ordered Storage**: Keys live in a `BTreeMap`, so `range` scans are cheap
//! - **Non-Blocking Connections**: Partial reads and partial writes resume
//!   exactly where they stopped
//! - **Backend Offload**: Storage operations never run on the I/O threads
//! - **Pipelining**: Several requests in one packet are answered in order
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              TreeKV                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │ State       │    │  Handler    │                  │
//! │  └─────────────┘    │ Machine     │    └─────────────┘                  │
//! │                     └──────┬──▲───┘                                     │
//! │                    submit  │  │ completion                              │
//! │                            ▼  │                                         │
//! │                     ┌─────────┴───────┐    ┌──────────────────────┐     │
//! │                     │ ServerDispatcher│───>│    StorageEngine     │     │
//! │                     │ (blocking pool) │    │  RwLock<BTreeMap>    │     │
//! │                     └─────────────────┘    └──────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use treekv::server::{Server, ServerConfig};
//! use treekv::storage::StorageEngine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Arc::new(StorageEngine::new());
//!     let server = Server::bind(ServerConfig::default(), engine).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `get <key> [<key> ...]`
//! - `set <key> <bytes>\r\n<data>`
//! - `delete <key>`
//! - `incr <key> <delta>` / `decr <key> <delta>`
//! - `range <start> <end|-> [<limit>]`
//! - `flush_all`, `stats`
//! - `version`, `quit`, `shutdown`
//!
//! ## Module Overview
//!
//! - [`protocol`]: text protocol parser and response encoding
//! - [`storage`]: the B-tree storage engine and its operations
//! - [`commands`]: the request handler connecting the two
//! - [`connection`]: the per-connection state machine
//! - [`server`]: listener, dispatcher and driver tasks

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use connection::{Connection, ConnectionState, Event, Transition};
pub use protocol::{Command, ParseError, Response};
pub use server::{Server, ServerConfig, ServerDispatcher};
pub use storage::{Operation, Reply, StorageEngine};

/// The default port TreeKV listens on
pub const DEFAULT_PORT: u16 = 7878;

/// The default host TreeKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of TreeKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
