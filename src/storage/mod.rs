//! Storage layer: disk I/O, free-space tracking and the boot file.
//!
//! This module provides the page file abstraction, the in-memory index of
//! pages with room for new records, and the atomically replaced boot pointer.

mod boot_file;
mod disk_manager;
mod free_space;

pub use boot_file::BootFile;
pub use disk_manager::{DiskManager, DiskManagerImpl};
pub use free_space::{FreeSpaceIndex, PageInfo};
