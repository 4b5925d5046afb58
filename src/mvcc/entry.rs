//! Versioned records.
//!
//! ```text
//! +---------+---------+-----------+
//! | xmin:8  | xmax:8  | payload   |
//! +---------+---------+-----------+
//! ```
//!
//! `xmin` created the row. `xmax` is 0 while the row is live, otherwise
//! the transaction that deleted it.

use crate::data::DataItem;
use crate::error::Result;
use crate::types::{Uid, Xid};
use std::sync::Arc;

const OFFSET_XMIN: usize = 0;
const OFFSET_XMAX: usize = 8;
const OFFSET_DATA: usize = 16;

/// Smallest record that can hold a row
pub const ENTRY_HEADER_LEN: usize = OFFSET_DATA;

/// Lay out a new row created by `xid`
pub fn wrap_entry_raw(xid: Xid, payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(OFFSET_DATA + payload.len());
    raw.extend_from_slice(&xid.to_be_bytes());
    raw.extend_from_slice(&0u64.to_be_bytes());
    raw.extend_from_slice(payload);
    raw
}

fn read_xid(data: &[u8], offset: usize) -> Xid {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    Xid::from_be_bytes(buf)
}

pub struct Entry {
    item: Arc<DataItem>,
}

impl Entry {
    pub fn new(item: Arc<DataItem>) -> Self {
        Self { item }
    }

    pub fn uid(&self) -> Uid {
        self.item.uid()
    }

    pub fn item(&self) -> &DataItem {
        &self.item
    }

    /// `(xmin, xmax)` read together
    pub fn versions(&self) -> (Xid, Xid) {
        self.item
            .with_data(|data| (read_xid(data, OFFSET_XMIN), read_xid(data, OFFSET_XMAX)))
    }

    pub fn xmin(&self) -> Xid {
        self.versions().0
    }

    pub fn xmax(&self) -> Xid {
        self.versions().1
    }

    /// Copy of the row payload
    pub fn payload(&self) -> Vec<u8> {
        self.item.with_data(|data| data[OFFSET_DATA..].to_vec())
    }

    /// Mark the row deleted by `xid`, logged under the same transaction
    pub fn set_xmax(&self, xid: Xid) -> Result<()> {
        let mut mutation = self.item.before();
        mutation.payload_mut()[OFFSET_XMAX..OFFSET_DATA].copy_from_slice(&xid.to_be_bytes());
        mutation.after(xid)
    }
}
