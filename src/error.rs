//! Error types for the storage kernel.

use crate::types::{PageId, Xid};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kernel operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage kernel
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page is beyond the end of the page file
    #[error("Page {0} not found")]
    PageNotFound(PageId),

    /// The resource cache is at its resident limit
    #[error("Cache is full")]
    CacheFull,

    /// No page with enough free space could be obtained
    #[error("Database is busy: no page available for insert")]
    DatabaseBusy,

    /// Page cache budget below the supported minimum
    #[error("Memory too small: {pages} pages (min: {min})")]
    MemTooSmall { pages: usize, min: usize },

    /// Record does not fit in a single page
    #[error("Data too large: {size} bytes (max: {max})")]
    DataTooLarge { size: usize, max: usize },

    /// The write-ahead log cannot be validated
    #[error("Bad log file: {0}")]
    BadLogFile(String),

    /// The transaction ledger is corrupt
    #[error("Bad xid file: {0}")]
    BadXidFile(String),

    /// A file that must be created already exists
    #[error("File already exists: {0}")]
    FileExists(PathBuf),

    /// A file that must be opened does not exist
    #[error("File does not exist: {0}")]
    FileNotExists(PathBuf),

    /// Wait-for graph cycle detected while acquiring a record lock
    #[error("Deadlock detected")]
    DeadLock,

    /// Another transaction modified the record first
    #[error("Concurrent update")]
    ConcurrentUpdate,

    /// The transaction id is not active in this kernel
    #[error("Unknown transaction {0}")]
    UnknownTransaction(Xid),

    /// Data corruption detected (e.g., malformed record header)
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Invalid operation for the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration could not be parsed
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl StorageError {
    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create a bad log file error
    pub fn bad_log(msg: impl Into<String>) -> Self {
        Self::BadLogFile(msg.into())
    }

    /// Create a bad xid file error
    pub fn bad_xid(msg: impl Into<String>) -> Self {
        Self::BadXidFile(msg.into())
    }

    /// Errors that leave the on-disk state unsafe to keep using.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::BadLogFile(_)
                | Self::BadXidFile(_)
                | Self::FileExists(_)
                | Self::FileNotExists(_)
                | Self::Corruption(_)
                | Self::MemTooSmall { .. }
        )
    }

    /// Errors the caller may retry, with a fresh transaction for the
    /// concurrency-control ones.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DeadLock | Self::ConcurrentUpdate | Self::CacheFull | Self::DatabaseBusy
        )
    }
}
