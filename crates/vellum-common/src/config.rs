//! Configuration structures for VellumDB.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the index engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for data and catalog files.
    pub data_dir: PathBuf,
    /// Buffer pool size in number of frames.
    pub buffer_pool_frames: usize,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            buffer_pool_frames: 256,
            fsync_enabled: false,
        }
    }
}

impl StorageConfig {
    /// Creates a configuration rooted at the given data directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Returns the total buffer pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.buffer_pool_frames * crate::page::PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.buffer_pool_frames, 256);
        assert!(!config.fsync_enabled);
    }

    #[test]
    fn test_with_data_dir() {
        let config = StorageConfig::with_data_dir("/tmp/vellum");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/vellum"));
        assert_eq!(config.buffer_pool_frames, 256);
    }

    #[test]
    fn test_buffer_pool_size_bytes() {
        let config = StorageConfig::default();
        assert_eq!(
            config.buffer_pool_size_bytes(),
            256 * crate::page::PAGE_SIZE
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = StorageConfig::with_data_dir("/var/lib/vellum");
        let json = serde_json::to_string(&config).unwrap();
        let recovered: StorageConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(recovered.data_dir, config.data_dir);
        assert_eq!(recovered.buffer_pool_frames, config.buffer_pool_frames);
        assert_eq!(recovered.fsync_enabled, config.fsync_enabled);
    }
}
