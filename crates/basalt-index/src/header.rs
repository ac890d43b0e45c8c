//! Header page: the well-known page 0 mapping index names to root pages.
//!
//! Layout:
//! - record_count: 4 bytes
//! - records: 36 bytes each (name, 32 bytes zero-padded + root page id)

use basalt_common::page::{PageId, PAGE_SIZE};

const COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

/// In-memory view of the header page.
pub struct HeaderPage {
    data: Box<[u8; PAGE_SIZE]>,
}

impl HeaderPage {
    /// Maximum number of records the header page can hold.
    pub const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

    /// Creates an empty header page.
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// Creates a header view from raw page bytes.
    pub fn from_bytes(data: &[u8; PAGE_SIZE]) -> Self {
        Self {
            data: Box::new(*data),
        }
    }

    /// Returns the raw page bytes.
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Returns the number of records.
    pub fn record_count(&self) -> usize {
        u32::from_le_bytes(
            self.data[COUNT_OFFSET..COUNT_OFFSET + 4]
                .try_into()
                .expect("count field is 4 bytes"),
        ) as usize
    }

    fn set_record_count(&mut self, count: usize) {
        self.data[COUNT_OFFSET..COUNT_OFFSET + 4].copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn record_offset(index: usize) -> usize {
        RECORDS_OFFSET + index * RECORD_SIZE
    }

    fn find_record(&self, name: &[u8; NAME_SIZE]) -> Option<usize> {
        (0..self.record_count()).find(|&i| {
            let offset = Self::record_offset(i);
            &self.data[offset..offset + NAME_SIZE] == name
        })
    }

    /// Zero-pads a name to record width. None if it does not fit.
    fn padded_name(name: &str) -> Option<[u8; NAME_SIZE]> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > NAME_SIZE {
            return None;
        }
        let mut padded = [0u8; NAME_SIZE];
        padded[..bytes.len()].copy_from_slice(bytes);
        Some(padded)
    }

    /// Inserts a `(name, root_page_id)` record.
    ///
    /// Returns false if the name already exists, does not fit, or the page is
    /// full.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        let Some(padded) = Self::padded_name(name) else {
            return false;
        };
        if self.find_record(&padded).is_some() {
            return false;
        }

        let count = self.record_count();
        if count >= Self::MAX_RECORDS {
            return false;
        }

        let offset = Self::record_offset(count);
        self.data[offset..offset + NAME_SIZE].copy_from_slice(&padded);
        self.data[offset + NAME_SIZE..offset + RECORD_SIZE]
            .copy_from_slice(&root_page_id.0.to_le_bytes());
        self.set_record_count(count + 1);
        true
    }

    /// Updates an existing record. Returns false if the name is not present.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        let Some(padded) = Self::padded_name(name) else {
            return false;
        };
        let Some(index) = self.find_record(&padded) else {
            return false;
        };

        let offset = Self::record_offset(index) + NAME_SIZE;
        self.data[offset..offset + 4].copy_from_slice(&root_page_id.0.to_le_bytes());
        true
    }

    /// Looks up the root page id recorded under a name.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        let padded = Self::padded_name(name)?;
        let index = self.find_record(&padded)?;

        let offset = Self::record_offset(index) + NAME_SIZE;
        Some(PageId(i32::from_le_bytes(
            self.data[offset..offset + 4]
                .try_into()
                .expect("root id field is 4 bytes"),
        )))
    }
}

impl Default for HeaderPage {
    fn default() -> Self {
        Self::new()
    }
}
