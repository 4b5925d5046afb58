//! Validity page (page 1).
//!
//! Bytes 100..108 hold a random stamp written on every open. Bytes
//! 108..116 receive a copy of it on a clean close. If the two differ when
//! the file is opened again, the previous run did not shut down cleanly.

use crate::page::{Page, PageBuf};

const OFFSET_STAMP: usize = 100;
const STAMP_LEN: usize = 8;

/// Initial contents of a fresh validity page (open stamp already set)
pub fn init_raw() -> PageBuf {
    let mut buf = PageBuf::new();
    write_open_stamp(&mut buf);
    buf
}

/// Stamp a new open marker; called every time the file is opened.
pub fn set_open(page: &Page) {
    write_open_stamp(&mut page.lock_mut());
}

/// Copy the open marker into the close slot on clean shutdown.
pub fn set_close(page: &Page) {
    let mut buf = page.lock_mut();
    buf.copy_within(
        OFFSET_STAMP..OFFSET_STAMP + STAMP_LEN,
        OFFSET_STAMP + STAMP_LEN,
    );
}

/// Whether the last shutdown was clean
pub fn check(page: &Page) -> bool {
    let buf = page.lock();
    buf[OFFSET_STAMP..OFFSET_STAMP + STAMP_LEN]
        == buf[OFFSET_STAMP + STAMP_LEN..OFFSET_STAMP + 2 * STAMP_LEN]
}

fn write_open_stamp(buf: &mut [u8]) {
    let stamp: [u8; STAMP_LEN] = rand::random();
    buf[OFFSET_STAMP..OFFSET_STAMP + STAMP_LEN].copy_from_slice(&stamp);
}
