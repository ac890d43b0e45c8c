//! Configuration structures for BasaltDB.

use crate::error::{BasaltError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the BasaltDB engine.
///
/// All options are constructor-time and immutable once a component is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the data file.
    pub data_dir: PathBuf,
    /// Buffer pool size in number of frames.
    pub pool_size: usize,
    /// K value for the LRU-K replacement policy.
    pub replacer_k: usize,
    /// Entries per extendible-hash bucket in the page directory.
    pub bucket_size: usize,
    /// Maximum entries per B+Tree leaf page.
    pub leaf_max_size: usize,
    /// Maximum entries per B+Tree internal page.
    pub internal_max_size: usize,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            pool_size: 1024,
            replacer_k: 2,
            bucket_size: 8,
            leaf_max_size: 128,
            internal_max_size: 128,
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Validates the configuration, returning the first offending parameter.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(invalid("pool_size", self.pool_size));
        }
        if self.replacer_k == 0 {
            return Err(invalid("replacer_k", self.replacer_k));
        }
        if self.bucket_size == 0 {
            return Err(invalid("bucket_size", self.bucket_size));
        }
        // A leaf must hold at least one entry besides the one that triggers a
        // split; an internal page needs room for two children.
        if self.leaf_max_size < 2 {
            return Err(invalid("leaf_max_size", self.leaf_max_size));
        }
        if self.internal_max_size < 3 {
            return Err(invalid("internal_max_size", self.internal_max_size));
        }
        Ok(())
    }

    /// Returns the total buffer pool size in bytes.
    pub fn pool_size_bytes(&self) -> usize {
        self.pool_size * crate::page::PAGE_SIZE
    }
}

fn invalid(name: &str, value: usize) -> BasaltError {
    BasaltError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}
