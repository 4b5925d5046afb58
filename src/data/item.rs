//! Data items: records stored on data pages.
//!
//! ```text
//! +----------+---------+--------------+
//! | valid:1  | size:2  | payload      |
//! +----------+---------+--------------+
//! ```
//!
//! `valid` is 0 for a live record and 1 for a withdrawn one. A record's
//! length never changes after insertion; updates rewrite the payload of
//! the same size in place.

use crate::error::{Result, StorageError};
use crate::page::Page;
use crate::types::{Uid, Xid};
use crate::wal::{LogRecord, Wal};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::sync::Arc;

const OFFSET_VALID: usize = 0;
const OFFSET_SIZE: usize = 1;
const OFFSET_DATA: usize = 3;

const VALID: u8 = 0;
const INVALID: u8 = 1;

/// Wrap a payload into the on-page record format
pub fn wrap_raw(payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(OFFSET_DATA + payload.len());
    raw.push(VALID);
    raw.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    raw.extend_from_slice(payload);
    raw
}

/// Mark a wrapped record as withdrawn
pub fn set_raw_invalid(raw: &mut [u8]) {
    raw[OFFSET_VALID] = INVALID;
}

/// Total record length (header included) of the record starting at `offset`
pub fn record_len(page_bytes: &[u8], offset: usize) -> Result<usize> {
    if offset + OFFSET_DATA > page_bytes.len() {
        return Err(StorageError::corruption(format!(
            "record header at {} runs past the page",
            offset
        )));
    }
    let size = u16::from_be_bytes([
        page_bytes[offset + OFFSET_SIZE],
        page_bytes[offset + OFFSET_SIZE + 1],
    ]) as usize;
    let len = OFFSET_DATA + size;
    if offset + len > page_bytes.len() {
        return Err(StorageError::corruption(format!(
            "record at {} with size {} runs past the page",
            offset, size
        )));
    }
    Ok(len)
}

/// A record view over a pinned page.
///
/// Readers take the latch shared; a mutation holds it exclusively from
/// `before` until `after` or `un_before`.
pub struct DataItem {
    uid: Uid,
    page: Arc<Page>,
    offset: usize,
    len: usize,
    latch: RwLock<()>,
    wal: Arc<Wal>,
}

impl DataItem {
    pub(crate) fn new(uid: Uid, page: Arc<Page>, wal: Arc<Wal>) -> Result<Self> {
        let offset = uid.offset() as usize;
        let len = record_len(&page.lock(), offset)?;
        Ok(Self {
            uid,
            page,
            offset,
            len,
            latch: RwLock::new(()),
            wal,
        })
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub(crate) fn page(&self) -> &Page {
        &self.page
    }

    pub fn is_valid(&self) -> bool {
        let _latch = self.latch.read();
        self.page.lock()[self.offset + OFFSET_VALID] == VALID
    }

    /// Payload length
    pub fn size(&self) -> usize {
        self.len - OFFSET_DATA
    }

    /// Run `f` over the payload under the shared latch
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let _latch = self.latch.read();
        let buf = self.page.lock();
        f(&buf[self.offset + OFFSET_DATA..self.offset + self.len])
    }

    /// Copy of the payload
    pub fn data(&self) -> Vec<u8> {
        self.with_data(<[u8]>::to_vec)
    }

    /// Start a mutation: latch the record exclusively and capture its
    /// before image.
    pub fn before(&self) -> ItemMutation<'_> {
        let latch = self.latch.write();
        let old_raw = self.page.lock_mut()[self.offset..self.offset + self.len].to_vec();
        let new_raw = old_raw.clone();
        ItemMutation {
            item: self,
            _latch: latch,
            old_raw,
            new_raw,
        }
    }
}

impl std::fmt::Debug for DataItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataItem")
            .field("uid", &self.uid)
            .field("size", &self.size())
            .finish()
    }
}

/// An in-flight change to one record.
///
/// Edits go to a staged copy; `after` logs the before/after images and only
/// then writes the staged bytes into the page. Dropping the mutation
/// without `after` leaves the record untouched.
pub struct ItemMutation<'a> {
    item: &'a DataItem,
    _latch: RwLockWriteGuard<'a, ()>,
    old_raw: Vec<u8>,
    new_raw: Vec<u8>,
}

impl ItemMutation<'_> {
    /// The staged payload
    pub fn payload(&self) -> &[u8] {
        &self.new_raw[OFFSET_DATA..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.new_raw[OFFSET_DATA..]
    }

    /// The record as it was when the mutation began (header included)
    pub fn old_raw(&self) -> &[u8] {
        &self.old_raw
    }

    /// Log the change under `xid`, then apply it to the page
    pub fn after(self, xid: Xid) -> Result<()> {
        let record = LogRecord::encode_update(xid, self.item.uid, &self.old_raw, &self.new_raw);
        self.item.wal.log(&record)?;

        let offset = self.item.offset;
        self.item.page.lock_mut()[offset..offset + self.new_raw.len()]
            .copy_from_slice(&self.new_raw);
        Ok(())
    }

    /// Abandon the change
    pub fn un_before(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{data_page, PageBuf};
    use crate::types::PageId;
    use tempfile::tempdir;

    fn item_on_fresh_page(wal: Arc<Wal>, payload: &[u8]) -> Result<DataItem> {
        let mut buf: PageBuf = data_page::init_raw();
        let offset = data_page::insert(&mut buf, &wrap_raw(payload));
        let page = Arc::new(Page::new(PageId::new(2), buf));
        DataItem::new(Uid::from_address(PageId::new(2), offset), page, wal)
    }

    #[test]
    fn test_wrap_raw_layout() {
        let mut raw = wrap_raw(b"abc");
        assert_eq!(raw, vec![0, 0, 3, b'a', b'b', b'c']);
        set_raw_invalid(&mut raw);
        assert_eq!(raw[0], 1);
    }

    #[test]
    fn test_record_len_rejects_overrun() {
        let mut buf = vec![0u8; 16];
        buf[10..13].copy_from_slice(&[0, 0, 20]);
        assert!(record_len(&buf, 10).is_err());
        assert!(record_len(&buf, 15).is_err());
        buf[10..13].copy_from_slice(&[0, 0, 2]);
        assert_eq!(record_len(&buf, 10).unwrap(), 5);
    }

    #[test]
    fn test_mutation_applies_after_logging() -> Result<()> {
        let dir = tempdir().unwrap();
        let wal = Arc::new(Wal::create(&dir.path().join("test.log"))?);
        let item = item_on_fresh_page(Arc::clone(&wal), b"hello")?;

        let mut mutation = item.before();
        mutation.payload_mut().copy_from_slice(b"jello");
        // staged edits are not visible in the page yet
        assert_eq!(&item.page().lock()[5..10], b"hello");
        mutation.after(4)?;

        assert_eq!(item.data(), b"jello");
        assert!(item.page().is_dirty());

        let records = wal.records()?;
        assert_eq!(records.len(), 1);
        match LogRecord::decode(&records[0])? {
            LogRecord::Update {
                xid,
                uid,
                old_raw,
                new_raw,
            } => {
                assert_eq!(xid, 4);
                assert_eq!(uid, item.uid());
                assert_eq!(&old_raw[3..], b"hello");
                assert_eq!(&new_raw[3..], b"jello");
            }
            other => panic!("expected update, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_un_before_discards() -> Result<()> {
        let dir = tempdir().unwrap();
        let wal = Arc::new(Wal::create(&dir.path().join("test.log"))?);
        let item = item_on_fresh_page(Arc::clone(&wal), b"keep")?;

        let mut mutation = item.before();
        mutation.payload_mut()[0] = b'X';
        assert_eq!(mutation.old_raw()[3..], *b"keep");
        mutation.un_before();

        assert_eq!(item.data(), b"keep");
        assert!(item.is_valid());
        assert!(wal.is_empty());
        Ok(())
    }
}
