//! Error types for BasaltDB.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using BasaltError.
pub type Result<T> = std::result::Result<T, BasaltError>;

/// Errors that can occur in BasaltDB storage operations.
#[derive(Debug, Error)]
pub enum BasaltError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Buffer pool errors
    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page not resident: {page_id}")]
    PageNotResident { page_id: PageId },

    #[error("Page {page_id} is pinned")]
    PagePinned { page_id: PageId },

    // Index errors
    #[error("Duplicate key")]
    DuplicateKey,

    #[error("Key not found")]
    KeyNotFound,

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Header page full, unable to register index {0}")]
    HeaderPageFull(String),

    #[error("B+Tree corrupted: {0}")]
    TreeCorrupted(String),

    // Configuration errors
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
