//! Data page format.
//!
//! ```text
//! +------+------------------------------+------------+
//! | FSO  | record | record | ...        | free space |
//! +------+------------------------------+------------+
//!   2B
//! ```
//!
//! FSO is the big-endian offset of the first free byte. Records are only
//! ever appended; deletion is a flag inside the record itself.

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::types::PAGE_SIZE;

const OFFSET_FREE: usize = 0;
const OFFSET_DATA: usize = 2;

/// Largest record a data page can hold
pub const MAX_FREE_SPACE: usize = PAGE_SIZE - OFFSET_DATA;

/// Initial contents of a fresh data page
pub fn init_raw() -> PageBuf {
    let mut buf = PageBuf::new();
    set_free_space_offset(&mut buf, OFFSET_DATA as u16);
    buf
}

pub fn free_space_offset(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[OFFSET_FREE], buf[OFFSET_FREE + 1]])
}

pub fn set_free_space_offset(buf: &mut [u8], offset: u16) {
    buf[OFFSET_FREE..OFFSET_FREE + 2].copy_from_slice(&offset.to_be_bytes());
}

/// Bytes still available for appends
pub fn free_space(buf: &[u8]) -> usize {
    PAGE_SIZE.saturating_sub(free_space_offset(buf) as usize)
}

/// Append a record at the free-space offset and return where it landed.
///
/// Panics if `raw` is longer than `free_space`; callers check it first.
pub fn insert(buf: &mut [u8], raw: &[u8]) -> u16 {
    let offset = free_space_offset(buf);
    let start = offset as usize;
    buf[start..start + raw.len()].copy_from_slice(raw);
    set_free_space_offset(buf, offset + raw.len() as u16);
    offset
}

fn check_span(buf: &[u8], raw: &[u8], offset: u16) -> Result<usize> {
    let start = offset as usize;
    let end = start + raw.len();
    if start < OFFSET_DATA || end > buf.len() {
        return Err(StorageError::corruption(format!(
            "logged record at {} with {} bytes does not fit in a page",
            offset,
            raw.len()
        )));
    }
    Ok(end)
}

/// Rewrite an insert during recovery, moving the free-space offset past
/// it if the record was never persisted.
pub fn recover_insert(buf: &mut [u8], raw: &[u8], offset: u16) -> Result<()> {
    let end = check_span(buf, raw, offset)?;
    buf[offset as usize..end].copy_from_slice(raw);

    if (free_space_offset(buf) as usize) < end {
        set_free_space_offset(buf, end as u16);
    }
    Ok(())
}

/// Rewrite record bytes in place during recovery.
pub fn recover_update(buf: &mut [u8], raw: &[u8], offset: u16) -> Result<()> {
    let end = check_span(buf, raw, offset)?;
    buf[offset as usize..end].copy_from_slice(raw);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_page_is_empty() {
        let buf = init_raw();
        assert_eq!(free_space_offset(&buf), 2);
        assert_eq!(free_space(&buf), MAX_FREE_SPACE);
    }

    #[test]
    fn test_insert_appends() {
        let mut buf = init_raw();
        let first = insert(&mut buf, b"hello");
        let second = insert(&mut buf, b"world!");

        assert_eq!(first, 2);
        assert_eq!(second, 7);
        assert_eq!(free_space_offset(&buf), 13);
        assert_eq!(&buf[7..13], b"world!");
        assert_eq!(free_space(&buf), PAGE_SIZE - 13);
    }

    #[test]
    fn test_recover_insert_advances_offset() {
        let mut buf = init_raw();
        recover_insert(&mut buf, b"abcd", 10).unwrap();
        assert_eq!(free_space_offset(&buf), 14);

        // replaying an earlier record leaves the offset alone
        recover_insert(&mut buf, b"xy", 2).unwrap();
        assert_eq!(free_space_offset(&buf), 14);
        assert_eq!(&buf[2..4], b"xy");
    }

    #[test]
    fn test_recover_update_in_place() {
        let mut buf = init_raw();
        let offset = insert(&mut buf, b"aaaa");
        recover_update(&mut buf, b"bb", offset + 1).unwrap();
        assert_eq!(&buf[2..6], b"abba");
        assert_eq!(free_space_offset(&buf), 6);
    }

    #[test]
    fn test_recover_rejects_out_of_page_records() {
        let mut buf = init_raw();
        let raw = vec![1u8; MAX_FREE_SPACE - 3];
        assert!(matches!(
            recover_insert(&mut buf, &raw, 6),
            Err(StorageError::Corruption(_))
        ));
        assert!(matches!(
            recover_update(&mut buf, b"ab", (PAGE_SIZE - 1) as u16),
            Err(StorageError::Corruption(_))
        ));
        // the page is untouched
        assert_eq!(free_space_offset(&buf), 2);
        assert!(buf[2..].iter().all(|&b| b == 0));
    }
}
