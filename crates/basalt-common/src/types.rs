//! Record identifiers for BasaltDB.

use crate::page::PageId;
use serde::{Deserialize, Serialize};

/// Identifier of a record in the data file: the page holding it plus the
/// slot number within that page.
///
/// The index layer treats `Rid` as an opaque value; only the record layer
/// interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    /// Page containing the record.
    pub page_id: PageId,
    /// Slot number within the page.
    pub slot_num: u32,
}

impl Rid {
    /// Creates a new record identifier.
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }

    /// Returns the Rid packed into a single u64 for compact storage.
    pub fn as_u64(&self) -> u64 {
        (((self.page_id.0 as u32) as u64) << 32) | (self.slot_num as u64)
    }

    /// Creates a Rid from its packed u64 representation.
    pub fn from_u64(value: u64) -> Self {
        Self {
            page_id: PageId((value >> 32) as u32 as i32),
            slot_num: value as u32,
        }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id.0, self.slot_num)
    }
}
