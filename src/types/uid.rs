//! Record identifier type.

use crate::types::PageId;
use std::fmt;

/// Address of one record: page number in the high 32 bits, in-page
/// offset in the low 16 bits. Bits 16..32 are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Uid(pub u64);

impl Uid {
    /// The null uid, used as "no record" in on-page pointers
    pub const NONE: Uid = Uid(0);

    /// Pack a page number and offset into a uid
    pub const fn from_address(page_id: PageId, offset: u16) -> Self {
        Self(((page_id.value() as u64) << 32) | offset as u64)
    }

    /// Get the raw 64-bit value
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Page the record lives on
    pub const fn page_id(self) -> PageId {
        PageId::new((self.0 >> 32) as u32)
    }

    /// Offset of the record header within its page
    pub const fn offset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_id(), self.offset())
    }
}

impl From<u64> for Uid {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<Uid> for u64 {
    fn from(uid: Uid) -> Self {
        uid.0
    }
}
