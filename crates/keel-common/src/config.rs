//! Configuration structures for the keel storage engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of resident pages in the cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Default interval between background flush ticks.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Storage configuration for a file-backed page store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the single backing file.
    pub path: PathBuf,
    /// Maximum number of pages resident in the cache.
    pub cache_capacity: usize,
    /// Interval between background flush ticks.
    pub flush_interval: Duration,
    /// Enable fsync after each flush tick.
    pub fsync_enabled: bool,
}

impl StorageConfig {
    /// Creates a configuration for the given backing file with defaults
    /// for everything else.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./keel.db"),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            fsync_enabled: true,
        }
    }
}
