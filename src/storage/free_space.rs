//! Free-space page index.
//!
//! An in-memory map from "how much room is left" to candidate pages. Free
//! space is bucketed in steps of `PAGE_SIZE / 40`. Selecting a page removes
//! it, so at most one inserter works on a page at a time; the inserter puts
//! the page back with its new free space when done.

use crate::types::{PageId, PAGE_SIZE};
use parking_lot::Mutex;
use std::collections::VecDeque;

const BUCKET_COUNT: usize = 40;
const BUCKET_WIDTH: usize = PAGE_SIZE / BUCKET_COUNT;

/// A page with its free space at the time it was indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page_id: PageId,
    pub free_space: usize,
}

/// Bucketed index of page free space
pub struct FreeSpaceIndex {
    buckets: Mutex<Vec<VecDeque<PageInfo>>>,
}

impl FreeSpaceIndex {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(vec![VecDeque::new(); BUCKET_COUNT + 1]),
        }
    }

    /// Register a page under its current free space
    pub fn add(&self, page_id: PageId, free_space: usize) {
        let bucket = (free_space / BUCKET_WIDTH).min(BUCKET_COUNT);
        self.buckets.lock()[bucket].push_back(PageInfo {
            page_id,
            free_space,
        });
    }

    /// Take a page with room for at least `need` bytes.
    ///
    /// The search starts one bucket above `need`'s own bucket. The last
    /// bucket gathers every nearly empty page, so candidates there are
    /// checked one by one.
    pub fn select(&self, need: usize) -> Option<PageInfo> {
        let mut bucket = need / BUCKET_WIDTH;
        if bucket < BUCKET_COUNT {
            bucket += 1;
        }

        let mut buckets = self.buckets.lock();
        buckets[bucket..].iter_mut().find_map(|candidates| {
            let at = candidates.iter().position(|info| info.free_space >= need)?;
            candidates.remove(at)
        })
    }

    /// Number of indexed pages
    pub fn len(&self) -> usize {
        self.buckets.lock().iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FreeSpaceIndex {
    fn default() -> Self {
        Self::new()
    }
}
