//! Ordered Storage Engine
//!
//! This module implements the storage engine behind TreeKV. All data lives in
//! a single `BTreeMap` guarded by an `RwLock`, which keeps keys in byte order
//! and makes range scans a straight walk over the tree.
//!
//! ## Design Decisions
//!
//! 1. **One ordered tree**: Range scans must see keys in order, so the data is
//!    not sharded by hash.
//! 2. **RwLock**: Point reads and scans share the lock; writers are exclusive.
//! 3. **Relaxed counters**: Statistics are approximate and never synchronise
//!    anything.
//!
//! ## Execution Model
//!
//! ```text
//!  Connection ──ComplexRequest──> Dispatcher ──spawn_blocking──┐
//!                                                              ▼
//!                                              StorageEngine::execute(op)
//!                                                              │
//!  Connection <──RequestComplete(reply)── Dispatcher <─────────┘
//! ```
//!
//! The engine itself is synchronous; callers decide which thread runs it.

use crate::storage::ops::{Operation, Reply};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The stored value cannot be interpreted as a signed 64-bit integer
    #[error("value is not an integer")]
    NotAnInteger,

    /// Applying the delta would leave the i64 range
    #[error("increment would overflow")]
    Overflow,
}

/// The storage engine for TreeKV.
///
/// Designed to be wrapped in an `Arc` and shared by every backend worker.
///
/// # Example
///
/// ```
/// use treekv::storage::StorageEngine;
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
/// engine.set(Bytes::from("apple"), Bytes::from("red"));
/// engine.set(Bytes::from("banana"), Bytes::from("yellow"));
///
/// assert_eq!(engine.get(b"apple"), Some(Bytes::from("red")));
///
/// let fruit = engine.range(b"a", b"c", 10);
/// assert_eq!(fruit.len(), 2);
/// ```
pub struct StorageEngine {
    tree: RwLock<BTreeMap<Bytes, Bytes>>,

    /// Statistics: total point lookups
    get_count: AtomicU64,

    /// Statistics: total writes (set and incr)
    set_count: AtomicU64,

    /// Statistics: total deletes
    del_count: AtomicU64,

    /// Statistics: total range scans
    scan_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("keys", &self.len())
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty storage engine.
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            scan_count: AtomicU64::new(0),
        }
    }

    /// Runs one backend operation to completion.
    ///
    /// This is what the dispatcher's workers call for every `ComplexRequest`.
    pub fn execute(&self, op: Operation) -> Reply {
        match op {
            Operation::Get { keys } => {
                let values = keys
                    .into_iter()
                    .filter_map(|key| self.get(&key).map(|value| (key, value)))
                    .collect();
                Reply::Values(values)
            }
            Operation::Set { key, value } => {
                self.set(key, value);
                Reply::Stored
            }
            Operation::Delete { key } => {
                if self.delete(&key) {
                    Reply::Deleted
                } else {
                    Reply::NotFound
                }
            }
            Operation::Incr { key, delta } => match self.incr_by(key, delta) {
                Ok(value) => Reply::Counter(value),
                Err(e) => Reply::Failed(e),
            },
            Operation::Range { start, end, limit } => {
                Reply::Values(self.range(&start, &end, limit))
            }
            Operation::FlushAll => {
                self.flush();
                Reply::Ok
            }
            Operation::Stats => Reply::Stats(self.stats()),
        }
    }

    /// Sets a key-value pair, overwriting any existing value.
    ///
    /// Returns `true` if a new key was created.
    pub fn set(&self, key: Bytes, value: Bytes) -> bool {
        self.set_count.fetch_add(1, Ordering::Relaxed);
        let mut tree = self.tree.write().unwrap();
        tree.insert(key, value).is_none()
    }

    /// Gets the value for a key.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        let tree = self.tree.read().unwrap();
        tree.get(key).cloned()
    }

    /// Deletes a key.
    ///
    /// Returns `true` if the key existed.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);
        let mut tree = self.tree.write().unwrap();
        tree.remove(key).is_some()
    }

    /// Adds `delta` to the integer stored at `key`.
    ///
    /// A missing key counts as 0. The read-modify-write happens under a
    /// single write lock, so concurrent increments never lose updates.
    pub fn incr_by(&self, key: Bytes, delta: i64) -> Result<i64, StorageError> {
        self.set_count.fetch_add(1, Ordering::Relaxed);
        let mut tree = self.tree.write().unwrap();

        let current = match tree.get(&key) {
            Some(value) => std::str::from_utf8(value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(StorageError::NotAnInteger)?,
            None => 0,
        };

        let next = current.checked_add(delta).ok_or(StorageError::Overflow)?;
        tree.insert(key, Bytes::from(next.to_string()));
        Ok(next)
    }

    /// Returns up to `limit` entries with keys in `[start, end)`, ascending.
    ///
    /// An empty `end` means "no upper bound".
    pub fn range(&self, start: &[u8], end: &[u8], limit: usize) -> Vec<(Bytes, Bytes)> {
        self.scan_count.fetch_add(1, Ordering::Relaxed);

        if !end.is_empty() && start >= end {
            return Vec::new();
        }

        let upper = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end)
        };

        let tree = self.tree.read().unwrap();
        tree.range::<[u8], _>((Bound::Included(start), upper))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Removes every key.
    pub fn flush(&self) {
        self.tree.write().unwrap().clear();
    }

    /// Returns the number of keys stored.
    pub fn len(&self) -> usize {
        self.tree.read().unwrap().len()
    }

    /// Returns true if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns operation statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len() as u64,
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            scan_ops: self.scan_count.load(Ordering::Relaxed),
        }
    }
}

/// Storage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of keys currently stored
    pub keys: u64,
    /// Total point lookups
    pub get_ops: u64,
    /// Total writes
    pub set_ops: u64,
    /// Total deletes
    pub del_ops: u64,
    /// Total range scans
    pub scan_ops: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_set_and_get() {
        let engine = StorageEngine::new();

        assert!(engine.set(Bytes::from("key"), Bytes::from("value")));
        assert_eq!(engine.get(b"key"), Some(Bytes::from("value")));

        // Overwrite is not a new key
        assert!(!engine.set(Bytes::from("key"), Bytes::from("other")));
        assert_eq!(engine.get(b"key"), Some(Bytes::from("other")));
    }

    #[test]
    fn test_get_nonexistent() {
        let engine = StorageEngine::new();
        assert_eq!(engine.get(b"nonexistent"), None);
    }

    #[test]
    fn test_delete() {
        let engine = StorageEngine::new();

        engine.set(Bytes::from("key"), Bytes::from("value"));
        assert!(engine.delete(b"key"));
        assert_eq!(engine.get(b"key"), None);
        assert!(!engine.delete(b"key")); // Already deleted
    }

    #[test]
    fn test_incr() {
        let engine = StorageEngine::new();

        assert_eq!(engine.incr_by(Bytes::from("counter"), 1), Ok(1));
        assert_eq!(engine.incr_by(Bytes::from("counter"), 5), Ok(6));
        assert_eq!(engine.incr_by(Bytes::from("counter"), -10), Ok(-4));

        engine.set(Bytes::from("num"), Bytes::from("10"));
        assert_eq!(engine.incr_by(Bytes::from("num"), 1), Ok(11));
        assert_eq!(engine.get(b"num"), Some(Bytes::from("11")));
    }

    #[test]
    fn test_incr_errors() {
        let engine = StorageEngine::new();

        engine.set(Bytes::from("name"), Bytes::from("Ariz"));
        assert_eq!(
            engine.incr_by(Bytes::from("name"), 1),
            Err(StorageError::NotAnInteger)
        );

        engine.set(Bytes::from("max"), Bytes::from(i64::MAX.to_string()));
        assert_eq!(
            engine.incr_by(Bytes::from("max"), 1),
            Err(StorageError::Overflow)
        );
        // Failed increments leave the value alone
        assert_eq!(engine.get(b"max"), Some(Bytes::from(i64::MAX.to_string())));
    }

    #[test]
    fn test_range_is_ordered_and_half_open() {
        let engine = StorageEngine::new();
        for key in ["d", "a", "c", "b", "e"] {
            engine.set(Bytes::from(key), Bytes::from(key.to_uppercase()));
        }

        let keys: Vec<_> = engine
            .range(b"b", b"e", 10)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![Bytes::from("b"), Bytes::from("c"), Bytes::from("d")]);
    }

    #[test]
    fn test_range_limit_and_unbounded_end() {
        let engine = StorageEngine::new();
        for i in 0..10 {
            engine.set(Bytes::from(format!("k{}", i)), Bytes::from("v"));
        }

        assert_eq!(engine.range(b"k5", b"", 100).len(), 5);
        assert_eq!(engine.range(b"k0", b"", 3).len(), 3);
        assert!(engine.range(b"k5", b"k1", 100).is_empty());
    }

    #[test]
    fn test_execute_maps_replies() {
        let engine = StorageEngine::new();

        let reply = engine.execute(Operation::Set {
            key: Bytes::from("foo"),
            value: Bytes::from("bar"),
        });
        assert_eq!(reply, Reply::Stored);

        let reply = engine.execute(Operation::Get {
            keys: vec![Bytes::from("foo"), Bytes::from("missing")],
        });
        assert_eq!(
            reply,
            Reply::Values(vec![(Bytes::from("foo"), Bytes::from("bar"))])
        );

        let reply = engine.execute(Operation::Delete {
            key: Bytes::from("missing"),
        });
        assert_eq!(reply, Reply::NotFound);

        let reply = engine.execute(Operation::Incr {
            key: Bytes::from("foo"),
            delta: 1,
        });
        assert_eq!(reply, Reply::Failed(StorageError::NotAnInteger));
    }

    #[test]
    fn test_concurrent_incr() {
        let engine = Arc::new(StorageEngine::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        engine.incr_by(Bytes::from("counter"), 1).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.get(b"counter"), Some(Bytes::from("4000")));
    }

    #[test]
    fn test_flush_and_stats() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("a"), Bytes::from("1"));
        engine.set(Bytes::from("b"), Bytes::from("2"));
        engine.get(b"a");

        let stats = engine.stats();
        assert_eq!(stats.keys, 2);
        assert_eq!(stats.set_ops, 2);
        assert_eq!(stats.get_ops, 1);

        engine.flush();
        assert!(engine.is_empty());
    }

    #[test]
    fn test_execute_flush_all_and_stats() {
        let engine = StorageEngine::new();
        engine.execute(Operation::Set {
            key: Bytes::from("a"),
            value: Bytes::from("1"),
        });

        match engine.execute(Operation::Stats) {
            Reply::Stats(stats) => {
                assert_eq!(stats.keys, 1);
                assert_eq!(stats.set_ops, 1);
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        assert_eq!(engine.execute(Operation::FlushAll), Reply::Ok);
        assert!(engine.is_empty());
    }
}
