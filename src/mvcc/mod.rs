//! MVCC layer: versioned rows, visibility rules and record locks.

pub mod entry;
mod lock_table;
mod manager;
mod transaction;
pub mod visibility;

pub use entry::Entry;
pub use lock_table::{LockTable, LockWaiter};
pub use manager::VersionManager;
pub use transaction::{Transaction, TxnFailure};
