//! # Transactional Storage Kernel
//!
//! An embedded storage kernel for a small relational database: paged record
//! storage with write-ahead logging and crash recovery, multi-version
//! concurrency control over a durable transaction ledger, and a B+Tree
//! index stored in the same page file.
//!
//! ## Architecture
//!
//! The kernel is composed of layered components:
//!
//! - **Page Layer** (`page`): Raw pages, the validity page and data page format
//! - **Storage Layer** (`storage`): Disk I/O, free-space index and boot file
//! - **Buffer Pool** (`buffer`): Reference-counted resource cache over pages
//! - **Log Layer** (`wal`): Checksummed write-ahead log and recovery
//! - **Record Layer** (`data`): Records addressed by uid, with before/after mutation
//! - **Transaction Layer** (`txn`, `mvcc`): Ledger, visibility rules and record locks
//! - **Index Layer** (`btree`): B-link style B+Tree over `i64` keys
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txn_storage::{Config, IsolationLevel, Kernel};
//!
//! let kernel = Kernel::create(Config::new("my_database"))?;
//!
//! let xid = kernel.begin(IsolationLevel::ReadCommitted)?;
//! let uid = kernel.insert(xid, b"hello")?;
//! assert_eq!(kernel.read(xid, uid)?, Some(b"hello".to_vec()));
//! kernel.commit(xid)?;
//!
//! let index = kernel.load_index(kernel.create_index()?)?;
//! index.insert(42, uid)?;
//! assert_eq!(index.search(42)?, vec![uid]);
//! index.close()?;
//!
//! kernel.close()?;
//! ```

pub mod btree;
pub mod buffer;
pub mod data;
pub mod error;
pub mod mvcc;
pub mod page;
pub mod storage;
pub mod txn;
pub mod types;
pub mod wal;

pub use error::{Result, StorageError};
pub use types::{InsertRedo, IsolationLevel, PageId, Uid, Xid, PAGE_SIZE, SUPER_XID};

// Re-export main public API
pub use btree::{BPlusTree, TreeNode};
pub use data::DataManager;
pub use mvcc::VersionManager;
pub use storage::BootFile;
pub use txn::TransactionLedger;

use serde::{Deserialize, Deserializer, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use types::{DEFAULT_MEMORY, MIN_CACHE_PAGES};

/// Kernel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base path; the kernel's files are `<path>.db`, `.log`, `.xid` and `.bt`
    pub path: PathBuf,
    /// Page cache budget in bytes (default: 64MB). JSON also accepts "64MB".
    #[serde(default = "default_memory", deserialize_with = "deserialize_memory")]
    pub memory: u64,
    /// How recovery replays insert records.
    ///
    /// Defaults to `Standard`, which departs from the documented legacy
    /// replay that invalidates committed inserts during redo. Set `Legacy`
    /// to keep that behavior.
    #[serde(default)]
    pub insert_redo: InsertRedo,
}

fn default_memory() -> u64 {
    DEFAULT_MEMORY
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MemoryValue {
    Bytes(u64),
    Text(String),
}

fn deserialize_memory<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    match MemoryValue::deserialize(deserializer)? {
        MemoryValue::Bytes(bytes) => Ok(bytes),
        MemoryValue::Text(text) => parse_memory(&text).map_err(serde::de::Error::custom),
    }
}

impl Config {
    /// Create a new configuration with default settings
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            memory: DEFAULT_MEMORY,
            insert_redo: InsertRedo::default(),
        }
    }

    /// Set the page cache budget in bytes
    pub fn memory(mut self, bytes: u64) -> Self {
        self.memory = bytes;
        self
    }

    /// Set the insert replay mode used by recovery
    pub fn insert_redo(mut self, mode: InsertRedo) -> Self {
        self.insert_redo = mode;
        self
    }

    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StorageError::InvalidConfig(e.to_string()))
    }

    /// Number of pages the page cache can hold
    pub fn cache_pages(&self) -> usize {
        (self.memory / PAGE_SIZE as u64) as usize
    }

    fn validate(&self) -> Result<()> {
        let pages = self.cache_pages();
        if pages < MIN_CACHE_PAGES {
            return Err(StorageError::MemTooSmall {
                pages,
                min: MIN_CACHE_PAGES,
            });
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        with_suffix(&self.path, ".db")
    }

    pub fn log_path(&self) -> PathBuf {
        with_suffix(&self.path, ".log")
    }

    pub fn xid_path(&self) -> PathBuf {
        with_suffix(&self.path, ".xid")
    }

    pub fn boot_path(&self) -> PathBuf {
        with_suffix(&self.path, ".bt")
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Parse a memory size such as `"64MB"`, `"512KB"`, `"1GB"` or `"8192"`
pub fn parse_memory(text: &str) -> Result<u64> {
    let text = text.trim();
    let upper = text.to_ascii_uppercase();
    let (digits, unit) = [("KB", 1u64 << 10), ("MB", 1 << 20), ("GB", 1 << 30)]
        .iter()
        .find_map(|&(suffix, unit)| upper.strip_suffix(suffix).map(|digits| (digits, unit)))
        .unwrap_or((upper.as_str(), 1));

    let invalid = || StorageError::InvalidConfig(format!("invalid memory size: {:?}", text));
    digits
        .trim()
        .parse::<u64>()
        .map_err(|_| invalid())?
        .checked_mul(unit)
        .ok_or_else(invalid)
}

/// Main kernel handle providing transactional record storage
///
/// This is the primary public interface for the storage kernel. It owns
/// the ledger, data manager, version manager and boot file; dropping it
/// without `close` leaves the files as a crash would.
pub struct Kernel {
    vm: VersionManager,
    dm: Arc<DataManager>,
    ledger: Arc<TransactionLedger>,
    boot: BootFile,
    config: Config,
}

impl Kernel {
    /// Create a new database; fails if any of its files already exist
    pub fn create(config: Config) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(TransactionLedger::create(&config.xid_path())?);
        let dm = Arc::new(DataManager::create(
            &config.db_path(),
            &config.log_path(),
            config.memory,
        )?);
        let boot = BootFile::create(&config.boot_path())?;

        tracing::info!(path = %config.path.display(), memory = config.memory, "created kernel");
        Ok(Self::assemble(ledger, dm, boot, config))
    }

    /// Open an existing database, recovering it after a crash
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(TransactionLedger::open(&config.xid_path())?);
        let dm = Arc::new(DataManager::open(
            &config.db_path(),
            &config.log_path(),
            config.memory,
            &ledger,
            config.insert_redo,
        )?);
        let boot = BootFile::open(&config.boot_path())?;

        tracing::info!(
            path = %config.path.display(),
            memory = config.memory,
            transactions = ledger.counter(),
            "opened kernel"
        );
        Ok(Self::assemble(ledger, dm, boot, config))
    }

    fn assemble(ledger: Arc<TransactionLedger>, dm: Arc<DataManager>, boot: BootFile, config: Config) -> Self {
        let vm = VersionManager::new(Arc::clone(&dm), Arc::clone(&ledger));
        Self {
            vm,
            dm,
            ledger,
            boot,
            config,
        }
    }

    /// Get the configuration the kernel was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Flush and close every file. The next `open` skips recovery.
    pub fn close(self) -> Result<()> {
        let Self { vm, dm, ledger, .. } = self;
        drop(vm);
        dm.close()?;
        ledger.close()?;
        tracing::info!("closed kernel");
        Ok(())
    }

    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        self.vm.begin(level)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.vm.commit(xid)
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.vm.abort(xid)
    }

    /// Read a row as seen by `xid`
    ///
    /// Returns `None` if the row is not visible to it.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        self.vm.read(xid, uid)
    }

    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        self.vm.insert(xid, data)
    }

    /// Delete a row
    ///
    /// Returns `true` if this call deleted it.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        self.vm.delete(xid, uid)
    }

    /// Create an empty index and return its boot uid
    pub fn create_index(&self) -> Result<Uid> {
        BPlusTree::create(&self.dm)
    }

    /// Open the index whose boot uid is `boot_uid`
    pub fn load_index(&self, boot_uid: Uid) -> Result<BPlusTree> {
        BPlusTree::load(boot_uid, Arc::clone(&self.dm))
    }

    /// The pointer stored in the boot file
    pub fn boot_pointer(&self) -> Result<u64> {
        self.boot.load()
    }

    /// Atomically replace the pointer stored in the boot file
    pub fn set_boot_pointer(&self, value: u64) -> Result<()> {
        self.boot.update(value)
    }
}
