//! Page identifier type.

use std::fmt;

/// Number of a page in the page file.
///
/// Page numbers are 1-indexed. Page 1 holds the validity stamps;
/// record pages start from page 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PageId(pub u32);

impl PageId {
    /// Page holding the validity-check stamps
    pub const VALIDITY: PageId = PageId(1);

    /// First page available for records
    pub const FIRST_DATA: PageId = PageId(2);

    /// Create a new page ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw page number
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Check if this is a valid page number (0 never names a page)
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Calculate the byte offset of this page in the file
    pub const fn file_offset(self, page_size: usize) -> u64 {
        (self.0 as u64 - 1) * page_size as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PageId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<PageId> for u32 {
    fn from(id: PageId) -> Self {
        id.0
    }
}
