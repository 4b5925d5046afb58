//! Page layer: in-memory page frames and the two on-disk page formats.
//!
//! Page 1 is the validity page: two 8-byte stamps that detect an unclean
//! shutdown. Every other page is a data page, a 2-byte free-space offset
//! followed by records appended back to back.

pub mod data_page;
pub mod validity;

use crate::types::{PageId, PAGE_SIZE};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};

/// A raw page buffer
#[derive(Clone, PartialEq, Eq)]
pub struct PageBuf {
    data: Box<[u8]>,
}

impl PageBuf {
    /// Create a new zeroed page buffer
    pub fn new() -> Self {
        Self {
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
        }
    }

    /// Create a page buffer from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = Self::new();
        let len = bytes.len().min(PAGE_SIZE);
        buf.data[..len].copy_from_slice(&bytes[..len]);
        buf
    }

    /// Get a reference to the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the raw bytes
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Default for PageBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PageBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBuf").field("len", &self.data.len()).finish()
    }
}

impl std::ops::Deref for PageBuf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl std::ops::DerefMut for PageBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

/// A cached page.
///
/// The byte buffer sits behind its own mutex, so each page is locked
/// independently of every other page.
pub struct Page {
    id: PageId,
    data: Mutex<PageBuf>,
    dirty: AtomicBool,
}

impl Page {
    pub fn new(id: PageId, data: PageBuf) -> Self {
        Self {
            id,
            data: Mutex::new(data),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    /// Lock the buffer for reading
    pub fn lock(&self) -> MutexGuard<'_, PageBuf> {
        self.data.lock()
    }

    /// Lock the buffer for mutation; the page is marked dirty.
    pub fn lock_mut(&self) -> MutexGuard<'_, PageBuf> {
        let guard = self.data.lock();
        self.dirty.store(true, Ordering::Release);
        guard
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Copy of the current page bytes
    pub fn snapshot(&self) -> PageBuf {
        self.data.lock().clone()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_buf_from_bytes() {
        let buf = PageBuf::from_bytes(&[1, 2, 3]);
        assert_eq!(buf.len(), PAGE_SIZE);
        assert_eq!(&buf[..4], &[1, 2, 3, 0]);
    }

    #[test]
    fn test_lock_mut_marks_dirty() {
        let page = Page::new(PageId::new(2), PageBuf::new());
        {
            let buf = page.lock();
            assert_eq!(buf[0], 0);
        }
        assert!(!page.is_dirty());

        page.lock_mut()[10] = 7;
        assert!(page.is_dirty());
        assert_eq!(page.snapshot()[10], 7);

        page.set_dirty(false);
        assert!(!page.is_dirty());
    }
}
