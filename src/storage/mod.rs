//! Storage Engine Module
//!
//! This module provides the storage backend for TreeKV: an ordered,
//! thread-safe key-value tree plus the operation/reply types that travel
//! between connections and the backend workers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │          RwLock<BTreeMap<Bytes, Bytes>> + counters          │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ execute(Operation) -> Reply
//!              ┌─────────────┴─────────────┐
//!              │   Backend worker threads  │
//!              │   (tokio spawn_blocking)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use treekv::storage::{Operation, Reply, StorageEngine};
//! use bytes::Bytes;
//!
//! let engine = StorageEngine::new();
//! let reply = engine.execute(Operation::Set {
//!     key: Bytes::from("name"),
//!     value: Bytes::from("Ariz"),
//! });
//! assert_eq!(reply, Reply::Stored);
//! ```

pub mod engine;
pub mod ops;

// Re-export commonly used types
pub use engine::{StorageEngine, StorageError, StorageStats};
pub use ops::{Operation, Reply};
