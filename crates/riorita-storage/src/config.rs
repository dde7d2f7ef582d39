//! Storage configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Maximum logical size of one segment file.
pub const DEFAULT_SEGMENT_MAX_BYTES: i64 = 1024 * 1024 * 1024;

/// Default shard count for the compact engine.
pub const DEFAULT_GROUPS: usize = 8;

/// Configuration for the on-disk storage backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for all storage files.
    pub root: PathBuf,

    /// Number of shards for the compact engine.
    pub groups: usize,

    /// Segment rollover threshold in bytes. Lowered in tests to exercise
    /// rollover without gigabyte writes.
    pub segment_max_bytes: i64,

    /// Fsync the index log after every append. The default trades
    /// per-record durability for throughput, as earlier deployments did.
    pub sync_index: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data"),
            groups: DEFAULT_GROUPS,
            segment_max_bytes: DEFAULT_SEGMENT_MAX_BYTES,
            sync_index: false,
        }
    }
}

impl StorageConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}
