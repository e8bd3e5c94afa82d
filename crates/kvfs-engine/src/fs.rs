//! Filesystem facade.
//!
//! [`Filesystem`] owns the KV store, the metadata and blob tables and both
//! caches, and exposes the public operation set. Every mutation builds one
//! [`Transaction`] that carries the metadata row, its index row and any
//! external blob together; caches are only updated after that transaction
//! commits.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::blob_store::DataBlobStore;
use crate::cache::{BoundedCache, CacheStats};
use crate::config::EngineConfig;
use crate::error::{FsError, Result};
use crate::handle::FileHandle;
use crate::kvstore::{KvStore, MemoryKvStore};
use crate::meta_store::MetadataStore;
use crate::path;
use crate::txn::Transaction;
use crate::types::{unix_now, MetaEntry, OpenFlags, Payload, Stat, PERM_MASK, S_IFMT};
use crate::wal_store::PersistentKvStore;

/// Counters for both engine caches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FsCacheStats {
    /// Metadata entry cache.
    pub metadata: CacheStats,
    /// Data blob cache.
    pub data: CacheStats,
}

struct Inner {
    kv: Arc<dyn KvStore>,
    meta: MetadataStore,
    blobs: DataBlobStore,
    meta_cache: Mutex<BoundedCache<MetaEntry>>,
    data_cache: Mutex<BoundedCache<Arc<Vec<u8>>>>,
    inline_threshold: usize,
}

/// Handle to an open engine. Cheap to clone; clones share stores and caches.
#[derive(Clone)]
pub struct Filesystem {
    inner: Arc<Inner>,
}

impl Filesystem {
    /// Opens an engine as described by `config`, creating the root if needed.
    pub async fn mount(config: &EngineConfig) -> Result<Self> {
        let kv: Arc<dyn KvStore> = match &config.data_dir {
            Some(dir) => {
                let dir = dir.clone();
                let store = tokio::task::spawn_blocking(move || PersistentKvStore::open(&dir))
                    .await
                    .map_err(|e| FsError::Store(format!("open task failed: {}", e)))??;
                Arc::new(store)
            }
            None => Arc::new(MemoryKvStore::new()),
        };
        let fs = Self::with_store(kv, config).await?;
        info!(
            "Opened filesystem: data_dir={:?} inline_threshold={}",
            config.data_dir, config.inline_threshold
        );
        if config.checkpoint_on_open {
            fs.checkpoint().await?;
        }
        Ok(fs)
    }

    /// Opens a fresh in-memory engine with default settings.
    pub async fn in_memory() -> Result<Self> {
        Self::mount(&EngineConfig::default()).await
    }

    /// Builds an engine over an existing store.
    pub async fn with_store(kv: Arc<dyn KvStore>, config: &EngineConfig) -> Result<Self> {
        let inner = Inner {
            meta: MetadataStore::new(kv.clone()),
            blobs: DataBlobStore::new(kv.clone()),
            kv,
            meta_cache: Mutex::new(BoundedCache::new(config.metadata_cache_capacity)),
            data_cache: Mutex::new(BoundedCache::new(config.data_cache_capacity)),
            inline_threshold: config.inline_threshold,
        };
        let fs = Self {
            inner: Arc::new(inner),
        };
        fs.ensure_root().await?;
        Ok(fs)
    }

    async fn ensure_root(&self) -> Result<()> {
        if self.get_metadata(path::ROOT)?.is_none() {
            self.put_entry(MetaEntry::new_directory(path::ROOT, 0o755), None)
                .await?;
            info!("Created root directory");
        }
        Ok(())
    }

    // ---- caches ----------------------------------------------------------

    fn meta_cache(&self) -> MutexGuard<'_, BoundedCache<MetaEntry>> {
        self.inner
            .meta_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn data_cache(&self) -> MutexGuard<'_, BoundedCache<Arc<Vec<u8>>>> {
        self.inner
            .data_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Hit/miss/eviction counters for both caches.
    pub fn cache_stats(&self) -> FsCacheStats {
        FsCacheStats {
            metadata: self.meta_cache().stats(),
            data: self.data_cache().stats(),
        }
    }

    // ---- read-through helpers --------------------------------------------

    /// Metadata for `path`, from cache or store. Does not follow symlinks.
    pub(crate) fn get_metadata(&self, path: &str) -> Result<Option<MetaEntry>> {
        let cached = self.meta_cache().get(path);
        if cached.is_some() {
            return Ok(cached);
        }
        let entry = self.inner.meta.get(path)?;
        if let Some(e) = &entry {
            self.meta_cache().set(path.to_string(), e.clone());
        }
        Ok(entry)
    }

    fn get_blob(&self, path: &str) -> Result<Option<Arc<Vec<u8>>>> {
        let cached = self.data_cache().get(path);
        if cached.is_some() {
            return Ok(cached);
        }
        let blob = self.inner.blobs.get(path)?.map(Arc::new);
        if let Some(b) = &blob {
            self.data_cache().set(path.to_string(), b.clone());
        }
        Ok(blob)
    }

    /// The full payload of a file or symlink.
    pub(crate) fn load_payload(&self, entry: &MetaEntry) -> Result<Vec<u8>> {
        match entry.payload() {
            None => Err(FsError::IsADirectory {
                path: entry.path.clone(),
            }),
            Some(Payload::Inline(data)) => Ok(data.clone()),
            Some(Payload::External) => match self.get_blob(&entry.path)? {
                Some(blob) => Ok(blob.as_ref().clone()),
                None => Err(FsError::Store(format!(
                    "blob missing for external entry {}",
                    entry.path
                ))),
            },
        }
    }

    pub(crate) fn children_of(&self, dir: &str) -> Result<Vec<MetaEntry>> {
        self.inner.meta.children_of(dir)
    }

    // ---- write protocol ---------------------------------------------------

    /// Writes `entry` and, when `data` is given, its payload, in one transaction.
    ///
    /// `None` leaves the payload untouched. Otherwise `size` is set to the data
    /// length and the payload goes to the blob table iff it reaches the inline
    /// threshold; a blob left over from an earlier external payload is deleted.
    /// Returns the entry as stored.
    pub(crate) async fn put_entry(
        &self,
        mut entry: MetaEntry,
        data: Option<Vec<u8>>,
    ) -> Result<MetaEntry> {
        let mut txn = Transaction::begin(self.inner.kv.clone());
        let mut new_blob = None;
        let mut drop_blob = false;

        if let Some(bytes) = data {
            if !entry.is_dir() {
                entry.size = bytes.len() as u64;
                if bytes.len() >= self.inner.inline_threshold {
                    entry.set_payload(Payload::External);
                    self.inner.blobs.put(&mut txn, &entry.path, &bytes);
                    new_blob = Some(Arc::new(bytes));
                } else {
                    let stored_external = self
                        .get_metadata(&entry.path)?
                        .map(|e| e.data_external())
                        .unwrap_or(false);
                    if entry.data_external() || stored_external {
                        self.inner.blobs.delete(&mut txn, &entry.path);
                        drop_blob = true;
                    }
                    entry.set_payload(Payload::Inline(bytes));
                }
            }
        }
        self.inner.meta.put(&mut txn, &entry)?;
        txn.commit().await?;

        self.meta_cache().set(entry.path.clone(), entry.clone());
        if let Some(blob) = new_blob {
            self.data_cache().set(entry.path.clone(), blob);
        } else if drop_blob {
            self.data_cache().delete(&entry.path);
        }
        Ok(entry)
    }

    /// Deletes `entry` and its blob, if external, in one transaction.
    async fn delete_entry(&self, entry: &MetaEntry) -> Result<()> {
        let mut txn = Transaction::begin(self.inner.kv.clone());
        self.inner.meta.delete(&mut txn, entry);
        if entry.data_external() {
            self.inner.blobs.delete(&mut txn, &entry.path);
        }
        txn.commit().await?;

        self.meta_cache().delete(&entry.path);
        self.data_cache().delete(&entry.path);
        self.invalidate_listing(&entry.parent);
        Ok(())
    }

    fn invalidate_listing(&self, parent: &str) {
        self.meta_cache().invalidate_by_parent(parent);
    }

    // ---- resolution -------------------------------------------------------

    /// Fails unless the parent of `path` exists and is a directory.
    pub(crate) fn ensure_parent_exists(&self, path: &str) -> Result<()> {
        if path == path::ROOT {
            return Ok(());
        }
        let parent = path::dirname(path);
        match self.get_metadata(&parent)? {
            None => Err(FsError::not_found(&parent)),
            Some(entry) if !entry.is_dir() => Err(FsError::NotADirectory { path: parent }),
            Some(_) => Ok(()),
        }
    }

    /// Follows symlinks from `path` until a non-link or a missing entry.
    ///
    /// Returns the last path reached and its entry, if any. A path seen twice
    /// in the chain fails with [`FsError::Loop`].
    fn resolve_chain(&self, path: &str) -> Result<(String, Option<MetaEntry>)> {
        let mut visited = HashSet::new();
        let mut current = path.to_string();
        loop {
            if !visited.insert(current.clone()) {
                return Err(FsError::Loop { path: current });
            }
            match self.get_metadata(&current)? {
                Some(entry) if entry.is_symlink() => {
                    let target = self.load_payload(&entry)?;
                    current = path::normalize(&String::from_utf8_lossy(&target));
                }
                other => return Ok((current, other)),
            }
        }
    }

    /// The entry `path` ultimately refers to, or None if the chain dangles.
    pub(crate) fn resolve_symlink(&self, path: &str) -> Result<Option<MetaEntry>> {
        Ok(self.resolve_chain(path)?.1)
    }

    fn require(&self, path: &str) -> Result<MetaEntry> {
        self.get_metadata(path)?
            .ok_or_else(|| FsError::not_found(path))
    }

    // ---- public operations ------------------------------------------------

    /// Opens an existing node read-write, following symlinks.
    pub async fn open(&self, path: &str) -> Result<FileHandle> {
        let path = path::normalize(path);
        debug!("open: {}", path);
        let entry = self
            .resolve_symlink(&path)?
            .ok_or_else(|| FsError::not_found(&path))?;
        Ok(FileHandle::new(self.clone(), entry, OpenFlags::RDWR))
    }

    /// Creates an empty file, replacing any file already at `path`.
    pub async fn create(&self, path: &str) -> Result<FileHandle> {
        let path = path::normalize(path);
        debug!("create: {}", path);
        self.ensure_parent_exists(&path)?;
        if let Some(existing) = self.get_metadata(&path)? {
            if existing.is_dir() {
                return Err(FsError::IsADirectory { path });
            }
        }
        let entry = self
            .put_entry(MetaEntry::new_file(&path), Some(Vec::new()))
            .await?;
        self.invalidate_listing(&entry.parent);
        Ok(FileHandle::new(self.clone(), entry, OpenFlags::RDWR))
    }

    /// Opens `path` with POSIX-style `flags`.
    ///
    /// Symlinks are followed; with `CREATE` a dangling link creates its target.
    pub async fn openfile(&self, path: &str, flags: OpenFlags) -> Result<FileHandle> {
        let path = path::normalize(path);
        debug!("openfile: {} flags={:#o}", path, flags.bits());
        let (target, existing) = self.resolve_chain(&path)?;

        let entry = match existing {
            None => {
                if !flags.contains(OpenFlags::CREATE) {
                    return Err(FsError::not_found(&path));
                }
                self.ensure_parent_exists(&target)?;
                let entry = self
                    .put_entry(MetaEntry::new_file(&target), Some(Vec::new()))
                    .await?;
                self.invalidate_listing(&entry.parent);
                entry
            }
            Some(entry) => {
                if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUSIVE) {
                    return Err(FsError::AlreadyExists { path });
                }
                if flags.contains(OpenFlags::TRUNCATE) && !entry.is_dir() {
                    let mut entry = entry;
                    entry.mtime = unix_now();
                    self.put_entry(entry, Some(Vec::new())).await?
                } else {
                    entry
                }
            }
        };
        Ok(FileHandle::new(self.clone(), entry, flags))
    }

    /// Creates an empty directory with permission bits `mode`.
    pub async fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        let path = path::normalize(path);
        debug!("mkdir: {} mode={:#o}", path, mode);
        self.ensure_parent_exists(&path)?;
        if self.get_metadata(&path)?.is_some() {
            return Err(FsError::AlreadyExists { path });
        }
        let entry = self
            .put_entry(MetaEntry::new_directory(&path, mode), None)
            .await?;
        self.invalidate_listing(&entry.parent);
        Ok(())
    }

    /// Creates `path` and any missing ancestors in one transaction.
    ///
    /// Existing directories along the way are accepted; any other existing
    /// node fails with [`FsError::NotADirectory`].
    pub async fn mkdir_all(&self, path: &str, mode: u32) -> Result<()> {
        let path = path::normalize(path);
        debug!("mkdir_all: {} mode={:#o}", path, mode);
        let mut txn = Transaction::begin(self.inner.kv.clone());
        let mut created = Vec::new();
        for dir in path::ancestors_inclusive(&path) {
            match self.get_metadata(&dir)? {
                Some(entry) if entry.is_dir() => continue,
                Some(_) => return Err(FsError::NotADirectory { path: dir }),
                None => {
                    let entry = MetaEntry::new_directory(&dir, mode);
                    self.inner.meta.put(&mut txn, &entry)?;
                    created.push(entry);
                }
            }
        }
        txn.commit().await?;

        for entry in created {
            self.invalidate_listing(&entry.parent);
            self.meta_cache().set(entry.path.clone(), entry);
        }
        Ok(())
    }

    /// Creates a symlink at `linkpath` pointing at `target`. The target is not checked.
    pub async fn symlink(&self, target: &str, linkpath: &str) -> Result<()> {
        let linkpath = path::normalize(linkpath);
        debug!("symlink: {} -> {}", linkpath, target);
        self.ensure_parent_exists(&linkpath)?;
        if self.get_metadata(&linkpath)?.is_some() {
            return Err(FsError::AlreadyExists { path: linkpath });
        }
        let entry = MetaEntry::new_symlink(&linkpath, target);
        let entry = self
            .put_entry(entry, Some(target.as_bytes().to_vec()))
            .await?;
        self.invalidate_listing(&entry.parent);
        Ok(())
    }

    /// Attributes of `path` itself; symlinks are not followed.
    pub async fn stat(&self, path: &str) -> Result<Stat> {
        let path = path::normalize(path);
        debug!("stat: {}", path);
        Ok(Stat::from_entry(&self.require(&path)?))
    }

    /// Replaces the permission bits of `path`, keeping its type bits.
    pub async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        let path = path::normalize(path);
        debug!("chmod: {} mode={:#o}", path, mode);
        let mut entry = self.require(&path)?;
        entry.mode = (entry.mode & S_IFMT) | (mode & PERM_MASK);
        self.put_entry(entry, None).await?;
        Ok(())
    }

    /// Sets access and modification times of `path`.
    pub async fn chtimes(&self, path: &str, atime: u64, mtime: u64) -> Result<()> {
        let path = path::normalize(path);
        debug!("chtimes: {} atime={} mtime={}", path, atime, mtime);
        let mut entry = self.require(&path)?;
        entry.atime = atime;
        entry.mtime = mtime;
        self.put_entry(entry, None).await?;
        Ok(())
    }

    /// Resizes the file at `path`, zero-filling when it grows.
    pub async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        let path = path::normalize(path);
        debug!("truncate: {} size={}", path, size);
        let mut entry = self
            .resolve_symlink(&path)?
            .ok_or_else(|| FsError::not_found(&path))?;
        if entry.is_dir() {
            return Err(FsError::IsADirectory { path });
        }
        let len = usize::try_from(size)
            .map_err(|_| FsError::invalid(format!("truncate size {} too large", size)))?;
        let mut data = self.load_payload(&entry)?;
        data.resize(len, 0);
        entry.mtime = unix_now();
        self.put_entry(entry, Some(data)).await?;
        Ok(())
    }

    /// Removes a file, symlink or empty directory.
    pub async fn remove(&self, path: &str) -> Result<()> {
        let path = path::normalize(path);
        debug!("remove: {}", path);
        if path == path::ROOT {
            return Err(FsError::invalid("cannot remove the root directory"));
        }
        let entry = self.require(&path)?;
        if entry.is_dir() && self.inner.meta.has_children(&path)? {
            return Err(FsError::NotEmpty { path });
        }
        self.delete_entry(&entry).await
    }

    /// Removes `path` and everything beneath it in one transaction.
    ///
    /// A missing path is not an error. On the root, every child goes and the
    /// root itself stays.
    pub async fn remove_all(&self, path: &str) -> Result<()> {
        let path = path::normalize(path);
        debug!("remove_all: {}", path);
        if self.get_metadata(&path)?.is_none() {
            return Ok(());
        }
        let doomed: Vec<MetaEntry> = self
            .inner
            .meta
            .all_descendants(&path)?
            .into_iter()
            .filter(|e| e.path != path::ROOT)
            .collect();

        let mut txn = Transaction::begin(self.inner.kv.clone());
        for entry in &doomed {
            self.inner.meta.delete(&mut txn, entry);
            if entry.data_external() {
                self.inner.blobs.delete(&mut txn, &entry.path);
            }
        }
        txn.commit().await?;

        for entry in &doomed {
            self.meta_cache().delete(&entry.path);
            self.data_cache().delete(&entry.path);
        }
        self.invalidate_listing(&path::dirname(&path));
        debug!("remove_all: {} removed {} entries", path, doomed.len());
        Ok(())
    }

    /// Moves `old` to `new`, replacing a file or empty directory at `new`.
    ///
    /// A directory moves with its whole subtree. Its metadata is rewritten in
    /// one transaction; external blobs are then re-keyed in a second one, so a
    /// crash in between leaves the moved entries without their blobs.
    pub async fn rename(&self, old: &str, new: &str) -> Result<()> {
        let old = path::normalize(old);
        let new = path::normalize(new);
        debug!("rename: {} -> {}", old, new);

        let source = self.require(&old)?;
        if old == new {
            return Ok(());
        }
        if old == path::ROOT {
            return Err(FsError::invalid("cannot rename the root directory"));
        }
        if source.is_dir() && path::is_within(&new, &old) {
            return Err(FsError::invalid(format!(
                "cannot move {} into its own subtree {}",
                old, new
            )));
        }
        self.ensure_parent_exists(&new)?;

        let mut txn = Transaction::begin(self.inner.kv.clone());
        let replaced = self.get_metadata(&new)?;
        if let Some(dest) = &replaced {
            if dest.is_dir() && self.inner.meta.has_children(&new)? {
                return Err(FsError::NotEmpty { path: new });
            }
            if new == path::ROOT {
                return Err(FsError::invalid("cannot replace the root directory"));
            }
            self.inner.meta.delete(&mut txn, dest);
            if dest.data_external() {
                self.inner.blobs.delete(&mut txn, &dest.path);
            }
        }

        if source.is_dir() {
            self.rename_tree(txn, &old, &new).await?;
        } else {
            self.rename_leaf(txn, source.clone(), &new).await?;
        }

        if replaced.is_some() {
            self.meta_cache().delete(&new);
            self.data_cache().delete(&new);
        }
        self.invalidate_listing(&source.parent);
        self.invalidate_listing(&path::dirname(&new));
        Ok(())
    }

    async fn rename_leaf(&self, mut txn: Transaction, source: MetaEntry, new: &str) -> Result<()> {
        let old = source.path.clone();
        let blob = if source.data_external() {
            Some(self.load_payload(&source)?)
        } else {
            None
        };

        self.inner.meta.delete(&mut txn, &source);
        if blob.is_some() {
            self.inner.blobs.delete(&mut txn, &old);
        }
        let mut moved = source;
        moved.relocate(new.to_string());
        self.inner.meta.put(&mut txn, &moved)?;
        if let Some(data) = &blob {
            self.inner.blobs.put(&mut txn, new, data);
        }
        txn.commit().await?;

        self.meta_cache().delete(&old);
        self.data_cache().delete(&old);
        self.meta_cache().set(moved.path.clone(), moved);
        Ok(())
    }

    async fn rename_tree(&self, mut txn: Transaction, old: &str, new: &str) -> Result<()> {
        let descendants = self.inner.meta.all_descendants(old)?;

        let mut moves = Vec::with_capacity(descendants.len());
        for entry in &descendants {
            self.inner.meta.delete(&mut txn, entry);
        }
        for entry in descendants {
            let Some(new_path) = path::relocate(&entry.path, old, new) else {
                continue;
            };
            let old_path = entry.path.clone();
            let mut moved = entry;
            moved.relocate(new_path);
            self.inner.meta.put(&mut txn, &moved)?;
            moves.push((old_path, moved));
        }
        txn.commit().await?;

        {
            let mut cache = self.meta_cache();
            for (old_path, _) in &moves {
                cache.delete(old_path);
            }
        }
        debug!("rename: moved {} entries under {}", moves.len(), new);

        let mut blob_txn = Transaction::begin(self.inner.kv.clone());
        for (old_path, moved) in moves.iter().filter(|(_, m)| m.data_external()) {
            match self.inner.blobs.get(old_path)? {
                Some(data) => {
                    self.inner.blobs.put(&mut blob_txn, &moved.path, &data);
                    self.inner.blobs.delete(&mut blob_txn, old_path);
                }
                None => warn!("rename: no blob for external entry {}", old_path),
            }
        }
        blob_txn.commit().await?;

        let mut cache = self.data_cache();
        for (old_path, _) in &moves {
            cache.delete(old_path);
        }
        Ok(())
    }

    /// Target string stored in the symlink at `path`.
    pub async fn readlink(&self, path: &str) -> Result<String> {
        let path = path::normalize(path);
        debug!("readlink: {}", path);
        let entry = self.require(&path)?;
        if !entry.is_symlink() {
            return Err(FsError::invalid(format!("{} is not a symbolic link", path)));
        }
        let target = self.load_payload(&entry)?;
        Ok(String::from_utf8_lossy(&target).into_owned())
    }

    /// Direct children of the directory at `path`, sorted by name.
    pub async fn readdir(&self, path: &str) -> Result<Vec<Stat>> {
        let path = path::normalize(path);
        debug!("readdir: {}", path);
        let (dir, entry) = self.resolve_chain(&path)?;
        match entry {
            None => return Err(FsError::not_found(&path)),
            Some(e) if !e.is_dir() => return Err(FsError::NotADirectory { path }),
            Some(_) => {}
        }
        Ok(self
            .children_of(&dir)?
            .iter()
            .map(Stat::from_entry)
            .collect())
    }

    /// Whole payload of the file `path` refers to.
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let path = path::normalize(path);
        debug!("read_file: {}", path);
        let entry = self
            .resolve_symlink(&path)?
            .ok_or_else(|| FsError::not_found(&path))?;
        self.load_payload(&entry)
    }

    /// Creates or replaces the file `path` refers to with `data`, in one transaction.
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = path::normalize(path);
        debug!("write_file: {} len={}", path, data.len());
        let (target, existing) = self.resolve_chain(&path)?;
        let created = existing.is_none();
        let mut entry = match existing {
            Some(e) if e.is_dir() => return Err(FsError::IsADirectory { path }),
            Some(e) => e,
            None => {
                self.ensure_parent_exists(&target)?;
                MetaEntry::new_file(&target)
            }
        };
        let now = unix_now();
        entry.mtime = now;
        entry.atime = now;
        let entry = self.put_entry(entry, Some(data.to_vec())).await?;
        if created {
            self.invalidate_listing(&entry.parent);
        }
        Ok(())
    }

    /// Compacts the durable log into a checkpoint. No-op for in-memory engines.
    pub async fn checkpoint(&self) -> Result<()> {
        let kv = self.inner.kv.clone();
        tokio::task::spawn_blocking(move || kv.checkpoint())
            .await
            .map_err(|e| FsError::Store(format!("checkpoint task failed: {}", e)))??;
        info!("Checkpoint complete");
        Ok(())
    }
}
