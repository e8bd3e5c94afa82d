//! Metadata table with a secondary index on parent path.
//!
//! Entries are stored under `m/{path}` as bincode-encoded [`MetaEntry`]
//! values. The parent index lives under `p/{parent}\0{name}` with the child's
//! path as value, so listing a directory is a prefix scan over its own rows.
//! Both rows are always written in the same transaction.

use std::sync::Arc;

use crate::error::Result;
use crate::kvstore::KvStore;
use crate::path;
use crate::txn::Transaction;
use crate::types::MetaEntry;

/// Key prefix for metadata entries in the KV store.
const META_PREFIX: &[u8] = b"m/";
/// Key prefix for parent index rows.
const PARENT_INDEX_PREFIX: &[u8] = b"p/";
/// Separates the parent path from the child name in index keys. Never valid in a path.
const INDEX_SEP: u8 = 0;

fn meta_key(path: &str) -> Vec<u8> {
    let mut key = META_PREFIX.to_vec();
    key.extend_from_slice(path.as_bytes());
    key
}

fn index_prefix(parent: &str) -> Vec<u8> {
    let mut key = PARENT_INDEX_PREFIX.to_vec();
    key.extend_from_slice(parent.as_bytes());
    key.push(INDEX_SEP);
    key
}

fn index_key(entry: &MetaEntry) -> Vec<u8> {
    let mut key = index_prefix(&entry.parent);
    key.extend_from_slice(path::basename(&entry.path).as_bytes());
    key
}

/// Durable metadata table keyed by path.
pub struct MetadataStore {
    kv: Arc<dyn KvStore>,
}

impl MetadataStore {
    /// Creates a metadata table over `kv`.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Reads the entry at `path`, if any.
    pub fn get(&self, path: &str) -> Result<Option<MetaEntry>> {
        match self.kv.get(&meta_key(path))? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Queues an upsert of `entry` and its index row.
    ///
    /// The root has no index row: it is nobody's child.
    pub fn put(&self, txn: &mut Transaction, entry: &MetaEntry) -> Result<()> {
        let value = bincode::serialize(entry)?;
        txn.put(meta_key(&entry.path), value);
        if entry.path != path::ROOT {
            txn.put(index_key(entry), entry.path.as_bytes().to_vec());
        }
        Ok(())
    }

    /// Queues deletion of `entry` and its index row.
    pub fn delete(&self, txn: &mut Transaction, entry: &MetaEntry) {
        txn.delete(meta_key(&entry.path));
        if entry.path != path::ROOT {
            txn.delete(index_key(entry));
        }
    }

    /// Direct children of `parent`, sorted by name, via the parent index.
    pub fn children_of(&self, parent: &str) -> Result<Vec<MetaEntry>> {
        let rows = self.kv.scan_prefix(&index_prefix(parent))?;
        let mut children = Vec::with_capacity(rows.len());
        for (_key, child_path) in rows {
            let child_path = String::from_utf8_lossy(&child_path);
            // A row without its entry means a concurrent delete won; skip it.
            if let Some(entry) = self.get(&child_path)? {
                children.push(entry);
            }
        }
        Ok(children)
    }

    /// Returns true if `parent` has at least one child. Stops at the first index row.
    pub fn has_children(&self, parent: &str) -> Result<bool> {
        self.kv.has_prefix(&index_prefix(parent))
    }

    /// `root` and every entry beneath it.
    ///
    /// Scans the whole metadata table and filters by prefix, so the cost is
    /// proportional to the namespace size. Only directory rename and
    /// `remove_all` call this.
    pub fn all_descendants(&self, root: &str) -> Result<Vec<MetaEntry>> {
        let rows = self.kv.scan_prefix(META_PREFIX)?;
        let mut out = Vec::new();
        for (_key, value) in rows {
            let entry: MetaEntry = bincode::deserialize(&value)?;
            if path::is_within(&entry.path, root) {
                out.push(entry);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvstore::MemoryKvStore;

    fn make_store() -> (Arc<dyn KvStore>, MetadataStore) {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        (kv.clone(), MetadataStore::new(kv))
    }

    async fn put_all(kv: &Arc<dyn KvStore>, store: &MetadataStore, entries: &[MetaEntry]) {
        let mut txn = Transaction::begin(kv.clone());
        for e in entries {
            store.put(&mut txn, e).unwrap();
        }
        txn.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (kv, store) = make_store();
        let entry = MetaEntry::new_file("a.txt");
        put_all(&kv, &store, &[entry.clone()]).await;
        assert_eq!(store.get("a.txt").unwrap(), Some(entry));
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[tokio::test]
    async fn test_children_of_uses_direct_children_only() {
        let (kv, store) = make_store();
        put_all(
            &kv,
            &store,
            &[
                MetaEntry::new_directory(".", 0o755),
                MetaEntry::new_directory("d", 0o755),
                MetaEntry::new_file("d/b"),
                MetaEntry::new_file("d/a"),
                MetaEntry::new_directory("d/sub", 0o755),
                MetaEntry::new_file("d/sub/deep"),
                MetaEntry::new_file("dx"),
            ],
        )
        .await;

        let names: Vec<String> = store
            .children_of("d")
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(names, vec!["d/a", "d/b", "d/sub"]);

        let root: Vec<String> = store
            .children_of(".")
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(root, vec!["d", "dx"]);
    }

    #[tokio::test]
    async fn test_has_children() {
        let (kv, store) = make_store();
        put_all(
            &kv,
            &store,
            &[
                MetaEntry::new_directory("d", 0o755),
                MetaEntry::new_directory("e", 0o755),
                MetaEntry::new_file("d/f"),
            ],
        )
        .await;
        assert!(store.has_children("d").unwrap());
        assert!(!store.has_children("e").unwrap());
        assert!(!store.has_children("d/f").unwrap());
    }

    #[tokio::test]
    async fn test_delete_removes_index_row() {
        let (kv, store) = make_store();
        let child = MetaEntry::new_file("d/f");
        put_all(&kv, &store, &[MetaEntry::new_directory("d", 0o755), child.clone()]).await;

        let mut txn = Transaction::begin(kv.clone());
        store.delete(&mut txn, &child);
        txn.commit().await.unwrap();

        assert_eq!(store.get("d/f").unwrap(), None);
        assert!(!store.has_children("d").unwrap());
        assert!(store.children_of("d").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_descendants_prefix_match() {
        let (kv, store) = make_store();
        put_all(
            &kv,
            &store,
            &[
                MetaEntry::new_directory("x", 0o755),
                MetaEntry::new_directory("x/y", 0o755),
                MetaEntry::new_file("x/y/f"),
                MetaEntry::new_file("xy"),
                MetaEntry::new_file("other"),
            ],
        )
        .await;

        let mut paths: Vec<String> = store
            .all_descendants("x")
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["x", "x/y", "x/y/f"]);
    }

    #[tokio::test]
    async fn test_root_not_listed_as_own_child() {
        let (kv, store) = make_store();
        put_all(&kv, &store, &[MetaEntry::new_directory(".", 0o755)]).await;
        assert!(store.children_of(".").unwrap().is_empty());
        assert!(!store.has_children(".").unwrap());
    }
}
