//! Write transactions over the KV store.
//!
//! A [`Transaction`] buffers puts and deletes from any number of tables and
//! commits them through a single [`KvStore::write_batch`], which is the
//! engine's unit of atomicity. Reads are not part of the transaction.

use std::sync::Arc;

use crate::error::{FsError, Result};
use crate::kvstore::{BatchOp, KvStore};

/// Buffered set of writes committed atomically.
pub struct Transaction {
    kv: Arc<dyn KvStore>,
    ops: Vec<BatchOp>,
}

impl Transaction {
    /// Starts an empty transaction against `kv`.
    pub fn begin(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            ops: Vec::new(),
        }
    }

    /// Queues a put.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, value });
    }

    /// Queues a delete.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Commits every queued write as one batch.
    ///
    /// The batch runs on the blocking pool because the durable store fsyncs
    /// its log; the caller is suspended until the store acknowledges it.
    pub async fn commit(self) -> Result<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        let Transaction { kv, ops } = self;
        let count = ops.len();
        tokio::task::spawn_blocking(move || kv.write_batch(ops))
            .await
            .map_err(|e| FsError::Store(format!("commit task failed: {}", e)))??;
        tracing::trace!(ops = count, "transaction committed");
        Ok(())
    }
}
