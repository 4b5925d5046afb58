//! Buffer pool implementation.
//!
//! The buffer pool caches pages of the page file in a [`ResourceCache`].
//! Callers `get_page` and must `release` every page they got; a page whose
//! reference count drains to zero is written back if dirty and dropped.

use crate::buffer::cache::{CacheLoader, ResourceCache};
use crate::error::{Result, StorageError};
use crate::page::{Page, PageBuf};
use crate::storage::{DiskManager, DiskManagerImpl};
use crate::types::{PageId, MIN_CACHE_PAGES, PAGE_SIZE};
use std::path::Path;
use std::sync::Arc;

/// Trait for buffer pool operations
pub trait BufferPool: Send + Sync {
    /// Allocate a page holding `init`; the page is durable on return
    fn new_page(&self, init: &PageBuf) -> Result<PageId>;

    /// Fetch a page, pinning it until `release`
    fn get_page(&self, page_id: PageId) -> Result<Arc<Page>>;

    /// Unpin a page obtained from `get_page`
    fn release(&self, page: &Page) -> Result<()>;

    /// Write a page to disk regardless of its dirty flag
    fn flush_page(&self, page: &Page) -> Result<()>;

    /// Cut the page file down to `page_count` pages
    fn truncate(&self, page_count: u32) -> Result<()>;

    /// Get the total number of pages in the file
    fn page_count(&self) -> u32;

    /// Get the buffer pool capacity in pages
    fn capacity(&self) -> usize;

    /// Write back every cached page and sync the file
    fn close(&self) -> Result<()>;
}

/// Loads pages from disk and writes dirty ones back on eviction
pub struct PageLoader {
    disk_manager: Arc<dyn DiskManager>,
}

impl CacheLoader for PageLoader {
    type Item = Page;

    fn load_miss(&self, key: u64) -> Result<Arc<Page>> {
        let page_id = PageId::new(key as u32);
        let buf = self.disk_manager.read_page(page_id)?;
        Ok(Arc::new(Page::new(page_id, buf)))
    }

    fn evict(&self, _key: u64, page: &Arc<Page>) -> Result<()> {
        if page.is_dirty() {
            let buf = page.lock();
            self.disk_manager.write_page(page.id(), &buf)?;
            page.set_dirty(false);
        }
        Ok(())
    }
}

/// Buffer pool implementation
pub struct BufferPoolImpl {
    cache: ResourceCache<PageLoader>,
    disk_manager: Arc<dyn DiskManager>,
    capacity: usize,
}

impl BufferPoolImpl {
    /// Create a buffer pool over a disk manager, holding at most
    /// `capacity` pages.
    pub fn new(disk_manager: Arc<dyn DiskManager>, capacity: usize) -> Result<Self> {
        if capacity < MIN_CACHE_PAGES {
            return Err(StorageError::MemTooSmall {
                pages: capacity,
                min: MIN_CACHE_PAGES,
            });
        }

        let loader = PageLoader {
            disk_manager: Arc::clone(&disk_manager),
        };
        Ok(Self {
            cache: ResourceCache::new(loader, capacity),
            disk_manager,
            capacity,
        })
    }

    /// Create a new page file with a cache budget of `memory` bytes
    pub fn create(path: &Path, memory: u64) -> Result<Self> {
        let capacity = Self::capacity_for(memory);
        let dm = Arc::new(DiskManagerImpl::create(path)?);
        Self::new(dm, capacity)
    }

    /// Open an existing page file with a cache budget of `memory` bytes
    pub fn open(path: &Path, memory: u64) -> Result<Self> {
        let capacity = Self::capacity_for(memory);
        let dm = Arc::new(DiskManagerImpl::open(path)?);
        Self::new(dm, capacity)
    }

    fn capacity_for(memory: u64) -> usize {
        (memory / PAGE_SIZE as u64) as usize
    }
}

impl BufferPool for BufferPoolImpl {
    fn new_page(&self, init: &PageBuf) -> Result<PageId> {
        self.disk_manager.allocate_page(init)
    }

    fn get_page(&self, page_id: PageId) -> Result<Arc<Page>> {
        self.cache.get(page_id.value() as u64)
    }

    fn release(&self, page: &Page) -> Result<()> {
        self.cache.release(page.id().value() as u64)
    }

    fn flush_page(&self, page: &Page) -> Result<()> {
        let buf = page.lock();
        self.disk_manager.write_page(page.id(), &buf)?;
        self.disk_manager.sync()
    }

    fn truncate(&self, page_count: u32) -> Result<()> {
        self.disk_manager.truncate(page_count)
    }

    fn page_count(&self) -> u32 {
        self.disk_manager.page_count()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn close(&self) -> Result<()> {
        self.cache.close()?;
        self.disk_manager.sync()
    }
}
