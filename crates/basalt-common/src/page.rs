//! Page identifiers and size constants for BasaltDB storage.

use serde::{Deserialize, Serialize};

/// Size of a disk page in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Page id of the header page holding index-name to root-page records.
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Unique identifier for a page in the data file.
///
/// Page ids are dense non-negative integers handed out by the disk manager;
/// `PageId::INVALID` represents "no page".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub i32);

impl PageId {
    /// Invalid page ID.
    pub const INVALID: PageId = PageId(-1);

    /// Returns true if this is a valid page ID.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_constant() {
        assert_eq!(PAGE_SIZE, 4096);
    }

    #[test]
    fn test_page_id_validity() {
        let valid = PageId(0);
        let invalid = PageId::INVALID;

        assert!(valid.is_valid());
        assert!(!invalid.is_valid());
        assert_eq!(invalid, PageId(-1));
    }

    #[test]
    fn test_header_page_id() {
        assert_eq!(HEADER_PAGE_ID, PageId(0));
        assert!(HEADER_PAGE_ID.is_valid());
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId(42).to_string(), "page:42");
        assert_eq!(PageId::INVALID.to_string(), "page:-1");
    }

    #[test]
    fn test_page_id_ordering() {
        assert!(PageId(1) < PageId(2));
        assert!(PageId::INVALID < PageId(0));
    }

    #[test]
    fn test_page_id_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(PageId(1));
        set.insert(PageId(2));
        set.insert(PageId(1)); // Duplicate

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_page_id_serde_roundtrip() {
        let original = PageId(500);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: PageId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
