//! Data blob table for payloads at or above the inline threshold.
//!
//! Blobs share the path key of their metadata entry under the `d/` prefix.
//! Writes only go through a [`Transaction`] so a blob is never changed
//! without its metadata row.

use std::sync::Arc;

use crate::error::Result;
use crate::kvstore::KvStore;
use crate::txn::Transaction;

const DATA_PREFIX: &[u8] = b"d/";

fn data_key(path: &str) -> Vec<u8> {
    let mut key = DATA_PREFIX.to_vec();
    key.extend_from_slice(path.as_bytes());
    key
}

/// Durable blob table keyed by path.
pub struct DataBlobStore {
    kv: Arc<dyn KvStore>,
}

impl DataBlobStore {
    /// Creates a blob table over `kv`.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Reads the blob stored for `path`.
    pub fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.kv.get(&data_key(path))
    }

    /// Queues a write of `data` under `path`.
    pub fn put(&self, txn: &mut Transaction, path: &str, data: &[u8]) {
        txn.put(data_key(path), data.to_vec());
    }

    /// Queues removal of the blob under `path`.
    pub fn delete(&self, txn: &mut Transaction, path: &str) {
        txn.delete(data_key(path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvstore::MemoryKvStore;

    #[tokio::test]
    async fn test_put_get_delete() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let blobs = DataBlobStore::new(kv.clone());

        let mut txn = Transaction::begin(kv.clone());
        blobs.put(&mut txn, "big.bin", &[7u8; 5000]);
        assert_eq!(blobs.get("big.bin").unwrap(), None);
        txn.commit().await.unwrap();
        assert_eq!(blobs.get("big.bin").unwrap(), Some(vec![7u8; 5000]));

        let mut txn = Transaction::begin(kv.clone());
        blobs.delete(&mut txn, "big.bin");
        txn.commit().await.unwrap();
        assert_eq!(blobs.get("big.bin").unwrap(), None);
    }

    #[tokio::test]
    async fn test_blob_keys_do_not_collide_with_metadata() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let blobs = DataBlobStore::new(kv.clone());
        let mut txn = Transaction::begin(kv.clone());
        blobs.put(&mut txn, "f", b"payload");
        txn.commit().await.unwrap();
        assert!(!kv.has_prefix(b"m/").unwrap());
        assert!(kv.contains_key(b"d/f").unwrap());
    }
}
