//! Write-ahead log: checksummed log file, record formats and recovery.

mod log;
mod record;
pub mod recovery;

pub use log::{checksum, Wal};
pub use record::LogRecord;
pub use recovery::{recover, RecoveryStats};
