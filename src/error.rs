//! Error types for QuillKV
//!
//! Provides a unified error type for all operations, plus the status codes
//! returned per key by batch operations.

use thiserror::Error;

/// Result type alias using QuillError
pub type Result<T> = std::result::Result<T, QuillError>;

/// Unified error type for QuillKV operations
#[derive(Debug, Error)]
pub enum QuillError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    #[error("Record not found")]
    RecordNotFound,

    #[error("Record expired")]
    RecordExpired,

    #[error("Record tombstoned")]
    RecordTombstoned,

    #[error("Invalid datatype: {0}")]
    InvalidDatatype(String),

    #[error("Record too big: {size} bytes (max {max})")]
    RecordTooBig { size: usize, max: usize },

    #[error("Increment type mismatch: {0}")]
    IncrTypeMismatch(String),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL write failed: {0}")]
    WalWriteFailed(String),

    #[error("WAL corrupted at offset {offset}: {reason}")]
    WalCorrupted { offset: u64, reason: String },

    #[error("Flush queue stalled: {0}")]
    FlushStalled(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Block checksum mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    BlockChecksumMismatch {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("SSTable unusable: {0}")]
    SSTableUnusable(String),

    #[error("Block not cached")]
    CacheMiss,

    #[error("Key not present in block")]
    KeyNotInBlock,

    #[error("Compaction merge failed: {0}")]
    CompactionMergeFailed(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Codec error: {0}")]
    Codec(String),

    // -------------------------------------------------------------------------
    // Configuration / Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store is closed")]
    Closed,
}

impl QuillError {
    /// The status code reported for this error in batch results
    pub fn status(&self) -> StatusCode {
        match self {
            QuillError::RecordNotFound => StatusCode::NotFound,
            QuillError::RecordExpired => StatusCode::Expired,
            QuillError::RecordTombstoned => StatusCode::Tombstoned,
            QuillError::InvalidDatatype(_) => StatusCode::InvalidDatatype,
            QuillError::RecordTooBig { .. } => StatusCode::RecordTooBig,
            QuillError::IncrTypeMismatch(_) => StatusCode::IncrTypeMismatch,
            QuillError::WalWriteFailed(_) => StatusCode::WalWriteFailed,
            QuillError::WalCorrupted { .. } => StatusCode::WalCorrupted,
            QuillError::BlockChecksumMismatch { .. } => StatusCode::BlockChecksumMismatch,
            QuillError::SSTableUnusable(_) => StatusCode::SSTableUnusable,
            QuillError::CacheMiss => StatusCode::CacheMiss,
            QuillError::CompactionMergeFailed(_) => StatusCode::CompactionMergeFailed,
            _ => StatusCode::Failed,
        }
    }
}

impl From<bincode::Error> for QuillError {
    fn from(e: bincode::Error) -> Self {
        QuillError::Codec(e.to_string())
    }
}

/// Completion codes for data-path operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Found,
    Updated,
    NotFound,
    Expired,
    Tombstoned,
    InvalidDatatype,
    RecordTooBig,
    IncrTypeMismatch,
    WalWriteFailed,
    WalCorrupted,
    BlockChecksumMismatch,
    SSTableUnusable,
    CacheMiss,
    CompactionMergeFailed,
    /// At least one key of a batch failed
    PartialFailure,
    /// Any other failure (I/O, codec, closed store)
    Failed,
}

impl StatusCode {
    /// Whether this code reports a successful read or write
    pub fn is_success(self) -> bool {
        matches!(self, StatusCode::Found | StatusCode::Updated)
    }
}
