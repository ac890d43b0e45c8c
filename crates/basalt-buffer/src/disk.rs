//! Disk manager for page-level file I/O.

use basalt_common::page::{PageId, PAGE_SIZE};
use basalt_common::{BasaltError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};

/// Name of the data file inside the data directory.
const DATA_FILE_NAME: &str = "basalt.db";

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for the data file.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

impl From<&basalt_common::config::StorageConfig> for DiskManagerConfig {
    fn from(config: &basalt_common::config::StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Manages reading and writing pages of a single data file.
///
/// Page 0 is reserved for the header page; `allocate_page` hands out ids
/// starting at 1. A page that was allocated but never written reads back as
/// zeroes, so freshly allocated pages always start from a known state.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// The data file and its current page count.
    file: Mutex<FileState>,
    /// Next page id to hand out (monotone).
    next_page_id: AtomicI32,
}

struct FileState {
    file: File,
    num_pages: i32,
}

impl DiskManager {
    /// Creates a new disk manager, opening or creating the data file.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let path = config.data_dir.join(DATA_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as i32;

        Ok(Self {
            config,
            file: Mutex::new(FileState { file, num_pages }),
            // Page 0 is the header page; never hand it out.
            next_page_id: AtomicI32::new(num_pages.max(1)),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Reads a page from disk.
    ///
    /// Pages beyond the current end of the file read back as zeroes.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        if !page_id.is_valid() {
            return Err(BasaltError::PageNotResident { page_id });
        }

        let mut state = self.file.lock();
        let mut buffer = [0u8; PAGE_SIZE];

        if page_id.0 >= state.num_pages {
            return Ok(buffer);
        }

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Writes a page to disk, extending the file if needed.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        if !page_id.is_valid() {
            return Err(BasaltError::PageNotResident { page_id });
        }

        let mut state = self.file.lock();

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;

        if self.config.fsync_enabled {
            state.file.sync_all()?;
        }

        if page_id.0 >= state.num_pages {
            state.num_pages = page_id.0 + 1;
        }

        Ok(())
    }

    /// Allocates a new page id.
    ///
    /// Ids are monotone; the file is extended lazily on first write.
    pub fn allocate_page(&self) -> PageId {
        PageId(self.next_page_id.fetch_add(1, Ordering::AcqRel))
    }

    /// Deallocates a page id.
    ///
    /// Reclamation of disk space is out of scope for this engine; the id is
    /// simply retired.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Returns the number of pages currently materialized in the file.
    pub fn num_pages(&self) -> i32 {
        self.file.lock().num_pages
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.file.lock().file.sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk_manager() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        };
        let dm = DiskManager::new(config).unwrap();
        (dm, dir)
    }

    #[test]
    fn test_disk_manager_new() {
        let (dm, _dir) = create_test_disk_manager();
        assert!(dm.data_dir().exists());
        assert_eq!(dm.num_pages(), 0);
    }

    #[test]
    fn test_disk_manager_allocate_starts_after_header() {
        let (dm, _dir) = create_test_disk_manager();

        let page1 = dm.allocate_page();
        assert_eq!(page1, PageId(1));

        let page2 = dm.allocate_page();
        assert_eq!(page2, PageId(2));
    }

    #[test]
    fn test_disk_manager_write_read() {
        let (dm, _dir) = create_test_disk_manager();

        let page_id = dm.allocate_page();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[100] = 0xCD;
        data[PAGE_SIZE - 1] = 0xEF;
        dm.write_page(page_id, &data).unwrap();

        let read_data = dm.read_page(page_id).unwrap();
        assert_eq!(read_data[0], 0xAB);
        assert_eq!(read_data[100], 0xCD);
        assert_eq!(read_data[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_disk_manager_unwritten_page_reads_zeroed() {
        let (dm, _dir) = create_test_disk_manager();

        let page_id = dm.allocate_page();
        let data = dm.read_page(page_id).unwrap();
        assert!(data.iter().all(|&b| b == 0));

        // Beyond any allocation as well
        let data = dm.read_page(PageId(99)).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_manager_invalid_page_id() {
        let (dm, _dir) = create_test_disk_manager();

        assert!(dm.read_page(PageId::INVALID).is_err());
        assert!(dm.write_page(PageId::INVALID, &[0u8; PAGE_SIZE]).is_err());
    }

    #[test]
    fn test_disk_manager_overwrite_page() {
        let (dm, _dir) = create_test_disk_manager();

        let page_id = dm.allocate_page();

        let mut data1 = [0u8; PAGE_SIZE];
        data1[0] = 0xAA;
        dm.write_page(page_id, &data1).unwrap();

        let mut data2 = [0u8; PAGE_SIZE];
        data2[0] = 0xBB;
        dm.write_page(page_id, &data2).unwrap();

        let read_data = dm.read_page(page_id).unwrap();
        assert_eq!(read_data[0], 0xBB);
    }

    #[test]
    fn test_disk_manager_write_extends_file() {
        let (dm, _dir) = create_test_disk_manager();

        assert_eq!(dm.num_pages(), 0);

        dm.write_page(PageId(3), &[0x11u8; PAGE_SIZE]).unwrap();
        assert_eq!(dm.num_pages(), 4);

        // Intermediate pages read as zeroes
        let data = dm.read_page(PageId(1)).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_manager_persistence() {
        let dir = tempdir().unwrap();
        let page_id;

        {
            let config = DiskManagerConfig {
                data_dir: dir.path().to_path_buf(),
                fsync_enabled: true,
            };
            let dm = DiskManager::new(config).unwrap();
            page_id = dm.allocate_page();

            let mut data = [0u8; PAGE_SIZE];
            data[0] = 0xFF;
            dm.write_page(page_id, &data).unwrap();
        }

        {
            let config = DiskManagerConfig {
                data_dir: dir.path().to_path_buf(),
                fsync_enabled: true,
            };
            let dm = DiskManager::new(config).unwrap();

            let read_data = dm.read_page(page_id).unwrap();
            assert_eq!(read_data[0], 0xFF);

            // Allocation resumes past the persisted pages
            let next = dm.allocate_page();
            assert!(next.0 > page_id.0);
        }
    }

    #[test]
    fn test_disk_manager_flush() {
        let (dm, _dir) = create_test_disk_manager();

        let page_id = dm.allocate_page();
        dm.write_page(page_id, &[0x42u8; PAGE_SIZE]).unwrap();
        dm.flush().unwrap();
    }
}
