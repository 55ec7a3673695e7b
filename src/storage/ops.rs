//! Backend Operations and Replies
//!
//! A `ComplexRequest` hands an [`Operation`] to the dispatcher; the worker that
//! runs it sends back a [`Reply`] inside a completion event. Both types are
//! plain owned data so they can cross threads freely.

use crate::storage::engine::{StorageError, StorageStats};
use bytes::Bytes;

/// Work a connection delegates to the storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Look up one or more keys
    Get { keys: Vec<Bytes> },

    /// Store a value, overwriting any previous one
    Set { key: Bytes, value: Bytes },

    /// Remove a key
    Delete { key: Bytes },

    /// Add a signed delta to an integer value
    Incr { key: Bytes, delta: i64 },

    /// Scan keys in `[start, end)`; an empty `end` is unbounded
    Range {
        start: Bytes,
        end: Bytes,
        limit: usize,
    },

    /// Remove every key
    FlushAll,

    /// Snapshot the engine's counters
    Stats,
}

impl Operation {
    /// Short name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Get { .. } => "get",
            Operation::Set { .. } => "set",
            Operation::Delete { .. } => "delete",
            Operation::Incr { .. } => "incr",
            Operation::Range { .. } => "range",
            Operation::FlushAll => "flush_all",
            Operation::Stats => "stats",
        }
    }
}

/// Result of a backend operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Key/value pairs found (possibly none)
    Values(Vec<(Bytes, Bytes)>),

    /// The value was stored
    Stored,

    /// The key was removed
    Deleted,

    /// The key did not exist
    NotFound,

    /// The counter's new value
    Counter(i64),

    /// The operation succeeded and has nothing to report
    Ok,

    /// Engine statistics
    Stats(StorageStats),

    /// The operation was rejected by the engine
    Failed(StorageError),
}
