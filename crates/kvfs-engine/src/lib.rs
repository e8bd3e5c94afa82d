#![warn(missing_docs)]

//! kvfs engine: a path-keyed POSIX-like filesystem stored in a transactional
//! embedded key-value store, with inline/external payload separation, LRU
//! caches and symlink resolution.

pub mod blob_store;
pub mod cache;
pub mod config;
pub mod error;
pub mod fs;
pub mod handle;
pub mod kvstore;
pub mod meta_store;
pub mod path;
pub mod txn;
pub mod types;
pub mod wal_store;

pub use cache::CacheStats;
pub use config::EngineConfig;
pub use error::{FsError, Result};
pub use fs::{Filesystem, FsCacheStats};
pub use handle::FileHandle;
pub use kvstore::{KvStore, MemoryKvStore};
pub use types::{FileType, MetaEntry, OpenFlags, Stat, INLINE_THRESHOLD};
pub use wal_store::PersistentKvStore;
