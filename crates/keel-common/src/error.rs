//! Error types for the keel storage engine.

use thiserror::Error;

/// Result type alias using KeelError.
pub type Result<T> = std::result::Result<T, KeelError>;

/// Errors that can occur in keel storage operations.
#[derive(Debug, Error)]
pub enum KeelError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Validation errors
    #[error("row of {size} bytes exceeds maximum of {max}")]
    RowTooLarge { size: usize, max: usize },

    // Cache errors
    #[error("page cache is full and contains no evictable pages")]
    CacheFull,

    // Lookup errors
    #[error("page not found at offset {offset}")]
    PageNotFound { offset: u64 },

    #[error("record not found for key {key}")]
    RecordNotFound { key: u32 },

    // Decode errors
    #[error("unexpected node type: expected {expected}, got {actual}")]
    UnexpectedNodeType { expected: u8, actual: u8 },

    #[error("invalid node type tag: {0}")]
    InvalidNodeType(u8),

    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("page corrupted at offset {offset}: {reason}")]
    PageCorrupted { offset: u64, reason: String },

    // Store lifecycle errors
    #[error("store is closed")]
    StoreClosed,
}
