//! Buffer pool manager.

use crate::disk::DiskManager;
use crate::frame::{BufferFrame, FrameId};
use crate::hash_table::ExtendibleHashTable;
use crate::replacer::{LruKReplacer, Replacer};
use basalt_common::config::StorageConfig;
use basalt_common::page::{PageId, PAGE_SIZE};
use basalt_common::{BasaltError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use sysinfo::System;
use tracing::debug;

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub pool_size: usize,
    /// K value for the LRU-K replacement policy.
    pub replacer_k: usize,
    /// Entries per bucket in the page-directory hash table.
    pub bucket_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024,
            replacer_k: 2,
            bucket_size: 8,
        }
    }
}

impl From<&StorageConfig> for BufferPoolConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            pool_size: config.pool_size,
            replacer_k: config.replacer_k,
            bucket_size: config.bucket_size,
        }
    }
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames:
/// - Page id to frame id mapping via an extendible hash table
/// - Free frame list for unused frames
/// - LRU-K replacement for eviction, with write-back of dirty victims
/// - Pin counting so in-use pages are never evicted
///
/// A single pool latch serializes every public operation; the hash table and
/// the replacer take their own latches underneath it, never the other way
/// around, so the ordering is acyclic. Disk I/O happens with the pool latch
/// held.
pub struct BufferPoolManager {
    /// Number of frames.
    pool_size: usize,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Disk manager for page I/O and page-id allocation.
    disk: Arc<DiskManager>,
    /// Page id to frame id mapping.
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// Page replacement policy.
    replacer: LruKReplacer,
    /// List of free frame ids.
    free_list: Mutex<VecDeque<FrameId>>,
    /// Pool latch serializing public operations.
    latch: Mutex<()>,
}

impl BufferPoolManager {
    /// Creates a new buffer pool manager.
    pub fn new(config: BufferPoolConfig, disk: Arc<DiskManager>) -> Self {
        let pool_size = config.pool_size;

        let frames: Vec<_> = (0..pool_size)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list
        let free_list: VecDeque<_> = (0..pool_size).map(|i| FrameId(i as u32)).collect();

        Self {
            pool_size,
            frames,
            disk,
            page_table: ExtendibleHashTable::new(config.bucket_size),
            replacer: LruKReplacer::new(pool_size, config.replacer_k),
            free_list: Mutex::new(free_list),
            latch: Mutex::new(()),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames so caching stays useful on low-memory systems.
    pub fn auto_sized(disk: Arc<DiskManager>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let pool_size = (available_bytes / 4 / PAGE_SIZE).max(1_000);

        Self::new(
            BufferPoolConfig {
                pool_size,
                ..Default::default()
            },
            disk,
        )
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Checks if a page is resident in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.find(&page_id).is_some()
    }

    /// Returns the disk manager backing this pool.
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Obtains a victim frame: the free list first, then the replacer.
    ///
    /// A dirty victim is written back before its frame is reused.
    fn acquire_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop_front() {
            return Ok(frame_id);
        }

        let Some(victim) = self.replacer.evict() else {
            return Err(BasaltError::BufferPoolFull);
        };

        let frame = &self.frames[victim.0 as usize];
        if let Some(old_page_id) = frame.page_id() {
            if frame.is_dirty() {
                debug!(%old_page_id, %victim, "writing back dirty page on eviction");
                let data = frame.read_data();
                self.disk.write_page(old_page_id, &data)?;
            }
            self.page_table.remove(&old_page_id);
        }
        frame.reset();

        Ok(victim)
    }

    /// Installs a page into a frame: pins it and touches the replacer.
    fn install_page(&self, page_id: PageId, frame_id: FrameId) -> &BufferFrame {
        let frame = &self.frames[frame_id.0 as usize];
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
        frame
    }

    /// Allocates a fresh page and pins it in a frame.
    ///
    /// Fails with `BufferPoolFull` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PageId, &BufferFrame)> {
        let _latch = self.latch.lock();

        let frame_id = self.acquire_frame()?;
        let page_id = self.disk.allocate_page();
        let frame = self.install_page(page_id, frame_id);

        Ok((page_id, frame))
    }

    /// Fetches a page, reading it from disk on a miss.
    ///
    /// The page is pinned before being returned; the caller must pair this
    /// with `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        let _latch = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(frame);
        }

        let frame_id = self.acquire_frame()?;
        let data = match self.disk.read_page(page_id) {
            Ok(data) => data,
            Err(e) => {
                // Return the frame rather than leaking it
                self.free_list.lock().push_back(frame_id);
                return Err(e);
            }
        };
        self.frames[frame_id.0 as usize].copy_from(&data);

        Ok(self.install_page(page_id, frame_id))
    }

    /// Unpins a page, OR-ing in the dirty flag.
    ///
    /// Returns false if the page is not resident or its pin count is already
    /// zero. When the pin count reaches zero the frame becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _latch = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];

        if is_dirty {
            frame.set_dirty(true);
        }

        if frame.pin_count() == 0 {
            return false;
        }

        if frame.unpin() == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes a resident page through to disk, dirty or not, and clears its
    /// dirty bit. Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let _latch = self.latch.lock();
        self.flush_page_locked(page_id)
    }

    fn flush_page_locked(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Ok(false);
        }
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };

        let frame = &self.frames[frame_id.0 as usize];
        {
            let data = frame.read_data();
            self.disk.write_page(page_id, &data)?;
        }
        frame.set_dirty(false);
        Ok(true)
    }

    /// Flushes every resident page. Returns the number flushed.
    pub fn flush_all(&self) -> Result<usize> {
        let _latch = self.latch.lock();

        let mut flushed = 0;
        for frame in &self.frames {
            if let Some(page_id) = frame.page_id() {
                if self.flush_page_locked(page_id)? {
                    flushed += 1;
                }
            }
        }
        Ok(flushed)
    }

    /// Deletes a page from the pool, freeing its frame.
    ///
    /// Returns `Ok(true)` trivially if the page is not resident, `Ok(false)`
    /// if it is pinned. The page id is retired through the disk manager.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let _latch = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(true);
        };

        let frame = &self.frames[frame_id.0 as usize];
        if frame.is_pinned() {
            return Ok(false);
        }

        self.replacer.remove(frame_id);
        self.page_table.remove(&page_id);
        frame.reset();
        self.free_list.lock().push_back(frame_id);
        self.disk.deallocate_page(page_id);

        Ok(true)
    }

    /// Returns a read guard for a page; unpins on drop.
    pub fn read_page(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(PageReadGuard {
            pool: self,
            page_id,
            frame,
        })
    }

    /// Returns a write guard for a page; unpins on drop.
    pub fn write_page(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(PageWriteGuard {
            pool: self,
            page_id,
            frame,
        })
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let _latch = self.latch.lock();

        let mut used_frames = 0;
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;

        for frame in &self.frames {
            if frame.page_id().is_some() {
                used_frames += 1;
                if frame.is_pinned() {
                    pinned_frames += 1;
                }
                if frame.is_dirty() {
                    dirty_frames += 1;
                }
            }
        }

        BufferPoolStats {
            total_frames: self.pool_size,
            free_frames: self.free_list.lock().len(),
            used_frames,
            pinned_frames,
            dirty_frames,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

/// RAII guard for reading a page.
pub struct PageReadGuard<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    frame: &'a BufferFrame,
}

impl<'a> PageReadGuard<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, false);
    }
}

/// RAII guard for writing a page.
pub struct PageWriteGuard<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    frame: &'a BufferFrame,
}

impl<'a> PageWriteGuard<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns mutable access to page data.
    pub fn data_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.write_data()
    }

    /// Marks the page as dirty.
    pub fn set_dirty(&self) {
        self.frame.set_dirty(true);
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.frame.is_dirty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManagerConfig;
    use tempfile::tempdir;

    fn create_test_pool(pool_size: usize) -> (BufferPoolManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                data_dir: dir.path().to_path_buf(),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let config = BufferPoolConfig {
            pool_size,
            replacer_k: 2,
            bucket_size: 4,
        };
        (BufferPoolManager::new(config, disk), dir)
    }

    #[test]
    fn test_buffer_pool_new() {
        let (pool, _dir) = create_test_pool(10);

        assert_eq!(pool.pool_size(), 10);
        assert_eq!(pool.free_count(), 10);
    }

    #[test]
    fn test_buffer_pool_new_page() {
        let (pool, _dir) = create_test_pool(10);

        let (page_id, frame) = pool.new_page().unwrap();

        assert!(page_id.is_valid());
        assert_eq!(frame.page_id(), Some(page_id));
        assert!(frame.is_pinned());
        assert_eq!(pool.free_count(), 9);
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_buffer_pool_fetch_hit() {
        let (pool, _dir) = create_test_pool(10);

        let (page_id, _) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false);

        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.page_id(), Some(page_id));
        assert_eq!(frame.pin_count(), 1);
    }

    #[test]
    fn test_buffer_pool_unpin() {
        let (pool, _dir) = create_test_pool(10);

        let (page_id, frame) = pool.new_page().unwrap();
        assert!(frame.is_pinned());

        assert!(pool.unpin_page(page_id, false));
        assert!(!frame.is_pinned());

        // Second unpin at zero fails
        assert!(!pool.unpin_page(page_id, false));

        // Unknown page fails
        assert!(!pool.unpin_page(PageId(9999), false));
    }

    #[test]
    fn test_buffer_pool_dirty_flag_is_sticky() {
        let (pool, _dir) = create_test_pool(10);

        let (page_id, frame) = pool.new_page().unwrap();
        pool.unpin_page(page_id, true);
        assert!(frame.is_dirty());

        // A later clean unpin must not clear the dirty bit
        pool.fetch_page(page_id).unwrap();
        pool.unpin_page(page_id, false);
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_buffer_pool_eviction() {
        let (pool, _dir) = create_test_pool(3);

        let mut pages = Vec::new();
        for _ in 0..3 {
            let (page_id, _) = pool.new_page().unwrap();
            pool.unpin_page(page_id, false);
            pages.push(page_id);
        }

        assert_eq!(pool.free_count(), 0);

        // One more page evicts an unpinned victim
        let (new_page_id, _) = pool.new_page().unwrap();
        assert!(pool.contains(new_page_id));

        let resident = pages.iter().filter(|p| pool.contains(**p)).count();
        assert_eq!(resident, 2);
    }

    #[test]
    fn test_buffer_pool_eviction_writes_back_dirty_page() {
        // Boundary scenario: pool of one frame, dirty page forced out, then
        // read again through the disk.
        let (pool, _dir) = create_test_pool(1);

        let (p1, frame) = pool.new_page().unwrap();
        frame.write_data()[0] = 0xAB;
        pool.unpin_page(p1, true);

        let (p2, _) = pool.new_page().unwrap();
        assert!(!pool.contains(p1));
        pool.unpin_page(p2, false);

        let frame = pool.fetch_page(p1).unwrap();
        assert_eq!(frame.read_data()[0], 0xAB);
    }

    #[test]
    fn test_buffer_pool_full_all_pinned() {
        let (pool, _dir) = create_test_pool(2);

        pool.new_page().unwrap();
        pool.new_page().unwrap();

        let result = pool.new_page();
        assert!(matches!(result, Err(BasaltError::BufferPoolFull)));

        let result = pool.fetch_page(PageId(999));
        assert!(matches!(result, Err(BasaltError::BufferPoolFull)));
    }

    #[test]
    fn test_buffer_pool_pinned_page_is_never_evicted() {
        let (pool, _dir) = create_test_pool(2);

        let (pinned, _) = pool.new_page().unwrap();
        let (other, _) = pool.new_page().unwrap();
        pool.unpin_page(other, false);

        // Fill the pool repeatedly; the pinned page must survive
        for _ in 0..5 {
            let (page_id, _) = pool.new_page().unwrap();
            pool.unpin_page(page_id, false);
            assert!(pool.contains(pinned));
        }
    }

    #[test]
    fn test_buffer_pool_delete_page() {
        let (pool, _dir) = create_test_pool(10);

        let (page_id, _) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false);

        assert!(pool.contains(page_id));
        assert!(pool.delete_page(page_id).unwrap());
        assert!(!pool.contains(page_id));
        assert_eq!(pool.free_count(), 10);

        // Deleting a non-resident page trivially succeeds
        assert!(pool.delete_page(page_id).unwrap());
    }

    #[test]
    fn test_buffer_pool_delete_pinned_page() {
        let (pool, _dir) = create_test_pool(10);

        let (page_id, _) = pool.new_page().unwrap();

        assert!(!pool.delete_page(page_id).unwrap());
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_buffer_pool_flush_page() {
        let (pool, _dir) = create_test_pool(10);

        let (page_id, frame) = pool.new_page().unwrap();
        frame.write_data()[7] = 0x77;
        pool.unpin_page(page_id, true);

        assert!(pool.flush_page(page_id).unwrap());
        assert!(!frame.is_dirty());

        let on_disk = pool.disk().read_page(page_id).unwrap();
        assert_eq!(on_disk[7], 0x77);

        // Unknown and invalid pages flush as false
        assert!(!pool.flush_page(PageId(9999)).unwrap());
        assert!(!pool.flush_page(PageId::INVALID).unwrap());
    }

    #[test]
    fn test_buffer_pool_flush_all() {
        let (pool, _dir) = create_test_pool(10);

        for _ in 0..5 {
            let (page_id, _) = pool.new_page().unwrap();
            pool.unpin_page(page_id, true);
        }

        assert_eq!(pool.flush_all().unwrap(), 5);

        let stats = pool.stats();
        assert_eq!(stats.dirty_frames, 0);
    }

    #[test]
    fn test_buffer_pool_flush_then_fetch_roundtrip() {
        // Unpin to zero, flush all, evict, then fetch again: the bytes
        // observed must equal the last written bytes.
        let (pool, _dir) = create_test_pool(2);

        let (page_id, frame) = pool.new_page().unwrap();
        frame.write_data()[100] = 0x42;
        pool.unpin_page(page_id, true);
        pool.flush_all().unwrap();

        // Force the page out
        for _ in 0..2 {
            let (p, _) = pool.new_page().unwrap();
            pool.unpin_page(p, false);
        }
        assert!(!pool.contains(page_id));

        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.read_data()[100], 0x42);
    }

    #[test]
    fn test_buffer_pool_read_write_guards() {
        let (pool, _dir) = create_test_pool(10);

        let (page_id, _) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false);

        {
            let guard = pool.write_page(page_id).unwrap();
            guard.set_dirty();
            guard.data_mut()[0] = 0xFF;
        }

        {
            let guard = pool.read_page(page_id).unwrap();
            assert_eq!(guard.page_id(), page_id);
            assert_eq!(guard.data()[0], 0xFF);
        }

        // Guards released their pins
        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.pin_count(), 1);
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_buffer_pool_stats() {
        let (pool, _dir) = create_test_pool(10);

        for i in 0..5 {
            let (page_id, _) = pool.new_page().unwrap();
            if i % 2 == 0 {
                pool.unpin_page(page_id, true);
            }
            // Odd pages remain pinned
        }

        let stats = pool.stats();
        assert_eq!(stats.total_frames, 10);
        assert_eq!(stats.free_frames, 5);
        assert_eq!(stats.used_frames, 5);
        assert_eq!(stats.pinned_frames, 2);
        assert_eq!(stats.dirty_frames, 3);
    }

    #[test]
    fn test_buffer_pool_config_from_storage_config() {
        let storage = StorageConfig {
            pool_size: 42,
            replacer_k: 3,
            bucket_size: 16,
            ..Default::default()
        };
        let config = BufferPoolConfig::from(&storage);
        assert_eq!(config.pool_size, 42);
        assert_eq!(config.replacer_k, 3);
        assert_eq!(config.bucket_size, 16);
    }
}
