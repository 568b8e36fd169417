//! Error types for VellumDB.

use thiserror::Error;

/// Result type alias using VellumError.
pub type Result<T> = std::result::Result<T, VellumError>;

/// Errors that can occur in VellumDB operations.
#[derive(Debug, Error)]
pub enum VellumError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Buffer pool errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: u64 },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page {page_id} is pinned and cannot be freed")]
    PagePinned { page_id: u64 },

    // Page errors
    #[error("Page full, unable to insert record")]
    PageFull,

    #[error("Invalid slot: {0}")]
    InvalidSlot(u16),

    #[error("Invalid node type")]
    InvalidNodeType,

    // Index errors
    #[error("Entry not found")]
    EntryNotFound,

    #[error("B+ tree corrupted: {0}")]
    TreeCorrupted(String),

    // Catalog errors
    #[error("File entry not found: {0}")]
    FileEntryNotFound(String),

    #[error("File entry already exists: {0}")]
    FileEntryExists(String),

    #[error("Catalog failure: {0}")]
    CatalogFailure(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: VellumError = io_err.into();
        assert!(matches!(err, VellumError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_page_not_found_display() {
        let err = VellumError::PageNotFound { page_id: 42 };
        assert_eq!(err.to_string(), "Page not found: 42");
    }

    #[test]
    fn test_buffer_pool_full_display() {
        let err = VellumError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_catalog_errors_display() {
        let err = VellumError::FileEntryNotFound("orders_idx".to_string());
        assert_eq!(err.to_string(), "File entry not found: orders_idx");

        let err = VellumError::FileEntryExists("orders_idx".to_string());
        assert_eq!(err.to_string(), "File entry already exists: orders_idx");
    }

    #[test]
    fn test_tree_corrupted_display() {
        let err = VellumError::TreeCorrupted("index node without left link".to_string());
        assert_eq!(
            err.to_string(),
            "B+ tree corrupted: index node without left link"
        );
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(VellumError::EntryNotFound)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VellumError>();
    }
}
