//! Storage configuration.

use std::path::PathBuf;

/// Configuration for opening a game tree.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Game root containing the `Data` (and optionally `Patch`) layer.
    pub root: PathBuf,
    /// Open CAS file handles kept alive at once.
    pub handle_cache_size: usize,
}

impl StorageConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            handle_cache_size: 16,
        }
    }
}
