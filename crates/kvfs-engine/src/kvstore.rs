//! Embedded key-value store abstraction.
//!
//! The engine only needs ordered keys, prefix scans and an atomic multi-key
//! batch. [`MemoryKvStore`] serves tests and ephemeral mounts; the durable
//! implementation lives in [`crate::wal_store`].

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use crate::error::{FsError, Result};

/// Key type for the KV store.
pub type Key = Vec<u8>;
/// Value type for the KV store.
pub type Value = Vec<u8>;
/// A key-value pair.
pub type KvPair = (Key, Value);

/// Key-value store trait for engine persistence.
///
/// `write_batch` is the only mutation path the engine uses: every operation in
/// a batch becomes visible together or not at all.
pub trait KvStore: Send + Sync {
    /// Get a value by key. Returns None if the key doesn't exist.
    fn get(&self, key: &[u8]) -> Result<Option<Value>>;

    /// Put a key-value pair. Overwrites any existing value.
    fn put(&self, key: Key, value: Value) -> Result<()> {
        self.write_batch(vec![BatchOp::Put { key, value }])
    }

    /// Delete a key. Returns Ok(()) even if the key didn't exist.
    fn delete(&self, key: &[u8]) -> Result<()> {
        self.write_batch(vec![BatchOp::Delete { key: key.to_vec() }])
    }

    /// Scan all keys with the given prefix, returning (key, value) pairs in sorted order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>>;

    /// Returns true if at least one key starts with `prefix`. Stops at the first match.
    fn has_prefix(&self, prefix: &[u8]) -> Result<bool>;

    /// Returns true if the key exists.
    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Atomically write a batch of operations (puts and deletes).
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()>;

    /// Compact durable state. A no-op for stores without a log.
    fn checkpoint(&self) -> Result<()> {
        Ok(())
    }
}

/// A single operation in a write batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    /// Put a key-value pair.
    Put {
        /// The key to insert or update.
        key: Vec<u8>,
        /// The value to store.
        value: Vec<u8>,
    },
    /// Delete a key.
    Delete {
        /// The key to delete.
        key: Vec<u8>,
    },
}

pub(crate) fn apply_ops(data: &mut BTreeMap<Vec<u8>, Vec<u8>>, ops: Vec<BatchOp>) {
    for op in ops {
        match op {
            BatchOp::Put { key, value } => {
                data.insert(key, value);
            }
            BatchOp::Delete { key } => {
                data.remove(&key);
            }
        }
    }
}

pub(crate) fn scan_map(data: &BTreeMap<Vec<u8>, Vec<u8>>, prefix: &[u8]) -> Vec<KvPair> {
    data.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub(crate) fn map_has_prefix(data: &BTreeMap<Vec<u8>, Vec<u8>>, prefix: &[u8]) -> bool {
    data.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
        .next()
        .is_some_and(|(k, _)| k.starts_with(prefix))
}

pub(crate) fn lock_err<E: std::fmt::Display>(e: E) -> FsError {
    FsError::Store(e.to_string())
}

/// In-memory KV store backed by a BTreeMap. Thread-safe via RwLock.
///
/// Does not persist data across restarts.
pub struct MemoryKvStore {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryKvStore {
    /// Creates a new empty in-memory KV store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let data = self.data.read().map_err(lock_err)?;
        Ok(data.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>> {
        let data = self.data.read().map_err(lock_err)?;
        Ok(scan_map(&data, prefix))
    }

    fn has_prefix(&self, prefix: &[u8]) -> Result<bool> {
        let data = self.data.read().map_err(lock_err)?;
        Ok(map_has_prefix(&data, prefix))
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut data = self.data.write().map_err(lock_err)?;
        apply_ops(&mut data, ops);
        Ok(())
    }
}
