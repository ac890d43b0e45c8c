//! Buffer pool management for BasaltDB.
//!
//! This crate provides in-memory page caching with:
//! - A disk manager for page-level file I/O and page-id allocation
//! - An extendible hash table as the page-id to frame-id directory
//! - An LRU-K eviction policy
//! - Pin counting and dirty-page tracking with write-back

mod disk;
mod frame;
mod hash_table;
mod pool;
mod replacer;

pub use disk::{DiskManager, DiskManagerConfig};
pub use frame::{BufferFrame, FrameId};
pub use hash_table::ExtendibleHashTable;
pub use pool::{
    BufferPoolConfig, BufferPoolManager, BufferPoolStats, PageReadGuard, PageWriteGuard,
};
pub use replacer::{LruKReplacer, Replacer};
