//! Disk manager implementation.
//!
//! The disk manager reads and writes whole pages of the page file at
//! `(page - 1) * PAGE_SIZE`. The page count is derived from the file length
//! on open and advanced by `allocate_page`, which makes a new page durable
//! before its number is handed out.

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::types::{PageId, PAGE_SIZE};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

/// Trait for disk I/O operations
///
/// This abstraction allows swapping the storage backend or mocking for tests.
pub trait DiskManager: Send + Sync {
    /// Read a page from disk
    fn read_page(&self, page_id: PageId) -> Result<PageBuf>;

    /// Write a page to disk
    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Append a page holding `init` and sync it before returning its number
    fn allocate_page(&self, init: &[u8]) -> Result<PageId>;

    /// Shrink (or extend) the file to exactly `page_count` pages
    fn truncate(&self, page_count: u32) -> Result<()>;

    /// Number of pages in the file
    fn page_count(&self) -> u32;

    /// Sync all data to disk
    fn sync(&self) -> Result<()>;
}

/// File-based disk manager implementation
pub struct DiskManagerImpl {
    /// The page file
    file: RwLock<File>,
    /// Pages currently in the file
    page_count: AtomicU32,
}

impl DiskManagerImpl {
    /// Create a new, empty page file. Fails if the file exists.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(StorageError::FileExists(path.to_path_buf()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file: RwLock::new(file),
            page_count: AtomicU32::new(0),
        })
    }

    /// Open an existing page file
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StorageError::FileNotExists(path.to_path_buf()));
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let page_count = (len / PAGE_SIZE as u64) as u32;

        Ok(Self {
            file: RwLock::new(file),
            page_count: AtomicU32::new(page_count),
        })
    }

    fn check_page_data(data: &[u8]) -> Result<()> {
        if data.len() != PAGE_SIZE {
            return Err(StorageError::invalid_operation(format!(
                "page data must be {} bytes, got {}",
                PAGE_SIZE,
                data.len()
            )));
        }
        Ok(())
    }
}

impl DiskManager for DiskManagerImpl {
    fn read_page(&self, page_id: PageId) -> Result<PageBuf> {
        if !page_id.is_valid() || page_id.value() > self.page_count() {
            return Err(StorageError::PageNotFound(page_id));
        }

        let offset = page_id.file_offset(PAGE_SIZE);
        let mut buf = PageBuf::new();

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf.as_bytes_mut())?;

        Ok(buf)
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if !page_id.is_valid() {
            return Err(StorageError::PageNotFound(page_id));
        }
        Self::check_page_data(data)?;

        let offset = page_id.file_offset(PAGE_SIZE);

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        Ok(())
    }

    fn allocate_page(&self, init: &[u8]) -> Result<PageId> {
        Self::check_page_data(init)?;

        // the file lock serializes allocation with truncation
        let mut file = self.file.write();
        let page_id = PageId::new(self.page_count.load(Ordering::Acquire) + 1);

        file.seek(SeekFrom::Start(page_id.file_offset(PAGE_SIZE)))?;
        file.write_all(init)?;
        file.sync_data()?;

        self.page_count.store(page_id.value(), Ordering::Release);
        tracing::debug!(page = page_id.value(), "allocated page");
        Ok(page_id)
    }

    fn truncate(&self, page_count: u32) -> Result<()> {
        let file = self.file.write();
        file.set_len(page_count as u64 * PAGE_SIZE as u64)?;
        file.sync_all()?;
        self.page_count.store(page_count, Ordering::Release);
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.page_count.load(Ordering::Acquire)
    }

    fn sync(&self) -> Result<()> {
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }
}
