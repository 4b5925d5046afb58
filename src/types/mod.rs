//! Common types used throughout the storage kernel.

mod page_id;
mod uid;

pub use page_id::PageId;
pub use uid::Uid;

use serde::{Deserialize, Serialize};

/// Page size in bytes (8KB)
pub const PAGE_SIZE: usize = 1 << 13;

/// Minimum number of pages the page cache must be able to hold
pub const MIN_CACHE_PAGES: usize = 10;

/// Default page-cache budget in bytes (64MB)
pub const DEFAULT_MEMORY: u64 = 64 << 20;

/// Transaction identifier
pub type Xid = u64;

/// The bypass transaction: always committed, never stored in the ledger.
pub const SUPER_XID: Xid = 0;

/// Isolation level requested at `begin`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IsolationLevel {
    /// Level 0: sees every committed version
    ReadCommitted,
    /// Any non-zero level: reads against the snapshot taken at `begin`
    RepeatableRead,
}

impl IsolationLevel {
    /// Whether this level captures a snapshot of active transactions
    pub fn uses_snapshot(self) -> bool {
        matches!(self, Self::RepeatableRead)
    }
}

impl From<u8> for IsolationLevel {
    fn from(level: u8) -> Self {
        match level {
            0 => Self::ReadCommitted,
            _ => Self::RepeatableRead,
        }
    }
}

/// How recovery replays insert records.
///
/// `Standard` reapplies an insert as logged during redo and withdraws it
/// (marks it invalid) during undo. `Legacy` invalidates the row during
/// redo and reapplies it untouched during undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InsertRedo {
    #[default]
    Standard,
    Legacy,
}
