//! Engine settings, loadable from TOML or JSON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::{DATA_CACHE_CAPACITY, METADATA_CACHE_CAPACITY};
use crate::types::INLINE_THRESHOLD;

/// Settings for opening a [`crate::Filesystem`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the write-ahead log and checkpoint. `None` keeps
    /// everything in memory.
    pub data_dir: Option<PathBuf>,
    /// Maximum number of cached metadata entries.
    pub metadata_cache_capacity: usize,
    /// Maximum number of cached data blobs.
    pub data_cache_capacity: usize,
    /// Payloads of at least this many bytes go to the blob table.
    pub inline_threshold: usize,
    /// Compact the log right after opening.
    pub checkpoint_on_open: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            metadata_cache_capacity: METADATA_CACHE_CAPACITY,
            data_cache_capacity: DATA_CACHE_CAPACITY,
            inline_threshold: INLINE_THRESHOLD,
            checkpoint_on_open: false,
        }
    }
}

impl EngineConfig {
    /// Config for a durable engine rooted at `dir`, other settings default.
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Loads a config from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: EngineConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: EngineConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }
}
