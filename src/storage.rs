//! Key-value storage abstraction for Semantra.
//!
//! The vector index keeps its structure in memory and on disk, but point
//! payloads, the index registry and per-index field configuration live in a
//! key-value store. This module exposes that store as a pluggable trait so the
//! in-memory backend used in tests and the directory-backed backend used by the
//! binary can be swapped without touching higher-level code.
//!
//! # Storage Types
//!
//! ## MemoryKvStore
//! - `HashMap` behind a `parking_lot::RwLock`
//! - Cheap to clone; clones share the same map, which lets a test reopen an
//!   engine over the "same" store
//!
//! ## FileKvStore
//! - One file per key inside a directory
//! - Each `put` is write-temp-then-rename, so a value is either the old or the
//!   new bytes, never a torn mix
//!
//! # Example
//!
//! ```
//! use semantra::storage::KeyValueStore;
//! use semantra::storage::memory::MemoryKvStore;
//!
//! # fn main() -> semantra::error::Result<()> {
//! let store = MemoryKvStore::new();
//! store.put("/index/hnsw/indexes", b"{}")?;
//! assert!(store.has("/index/hnsw/indexes")?);
//! assert_eq!(store.get("/index/hnsw/indexes")?, Some(b"{}".to_vec()));
//! # Ok(())
//! # }
//! ```

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Result;

pub mod file;
pub mod memory;

/// A store of byte values addressed by string keys.
///
/// Each individual operation is atomic. There are no transactions spanning
/// several keys; callers that write more than one key must tolerate a crash
/// between writes.
pub trait KeyValueStore: Send + Sync + Debug {
    /// Store `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Fetch the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Check whether `key` is present.
    fn has(&self, key: &str) -> Result<bool>;

    /// List every key starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).put(key, value)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn has(&self, key: &str) -> Result<bool> {
        (**self).has(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).keys_with_prefix(prefix)
    }
}
