//! Transaction ledger (`.xid` file).
//!
//! ```text
//! +-----------+-------+-------+-----
//! | counter:8 | xid 1 | xid 2 | ...
//! +-----------+-------+-------+-----
//! ```
//!
//! One state byte per transaction id, in allocation order. The counter is
//! the last id handed out, so the file is always `8 + counter` bytes long.

use crate::error::{Result, StorageError};
use crate::types::{Xid, SUPER_XID};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const HEADER_LEN: u64 = 8;

/// Durable state of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxnState {
    Active = 0,
    Committed = 1,
    Aborted = 2,
}

impl TryFrom<u8> for TxnState {
    type Error = StorageError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Active),
            1 => Ok(Self::Committed),
            2 => Ok(Self::Aborted),
            other => Err(StorageError::bad_xid(format!("invalid state byte {}", other))),
        }
    }
}

fn state_offset(xid: Xid) -> u64 {
    HEADER_LEN + (xid - 1)
}

pub struct TransactionLedger {
    file: Mutex<File>,
    /// Last allocated xid; held across `begin`
    counter: Mutex<Xid>,
}

impl TransactionLedger {
    /// Create an empty ledger. Fails if the file exists.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(StorageError::FileExists(path.to_path_buf()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(&0u64.to_be_bytes())?;
        file.sync_all()?;

        Ok(Self {
            file: Mutex::new(file),
            counter: Mutex::new(0),
        })
    }

    /// Open a ledger, checking its length against the stored counter
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StorageError::FileNotExists(path.to_path_buf()));
        }

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len < HEADER_LEN {
            return Err(StorageError::bad_xid(format!(
                "file is {} bytes, shorter than its header",
                len
            )));
        }

        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        let counter = u64::from_be_bytes(header);
        if HEADER_LEN + counter != len {
            return Err(StorageError::bad_xid(format!(
                "counter {} does not match file length {}",
                counter, len
            )));
        }

        Ok(Self {
            file: Mutex::new(file),
            counter: Mutex::new(counter),
        })
    }

    /// Allocate the next xid and record it as active
    pub fn begin(&self) -> Result<Xid> {
        let mut counter = self.counter.lock();
        let xid = *counter + 1;
        self.write_state(xid, TxnState::Active)?;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&xid.to_be_bytes())?;
        file.sync_data()?;

        *counter = xid;
        Ok(xid)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.update_state(xid, TxnState::Committed)
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.update_state(xid, TxnState::Aborted)
    }

    /// Current state of a transaction; the super transaction is always
    /// committed.
    pub fn state(&self, xid: Xid) -> Result<TxnState> {
        if xid == SUPER_XID {
            return Ok(TxnState::Committed);
        }
        self.check_known(xid)?;

        let mut byte = [0u8; 1];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(state_offset(xid)))?;
        file.read_exact(&mut byte)?;
        TxnState::try_from(byte[0])
    }

    pub fn is_active(&self, xid: Xid) -> Result<bool> {
        Ok(self.state(xid)? == TxnState::Active)
    }

    pub fn is_committed(&self, xid: Xid) -> Result<bool> {
        Ok(self.state(xid)? == TxnState::Committed)
    }

    pub fn is_aborted(&self, xid: Xid) -> Result<bool> {
        Ok(self.state(xid)? == TxnState::Aborted)
    }

    /// Last allocated xid
    pub fn counter(&self) -> Xid {
        *self.counter.lock()
    }

    pub fn close(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn check_known(&self, xid: Xid) -> Result<()> {
        if xid > *self.counter.lock() {
            return Err(StorageError::UnknownTransaction(xid));
        }
        Ok(())
    }

    fn update_state(&self, xid: Xid, state: TxnState) -> Result<()> {
        if xid == SUPER_XID {
            return Err(StorageError::invalid_operation(
                "the super transaction has no ledger entry",
            ));
        }
        self.check_known(xid)?;
        self.write_state(xid, state)
    }

    fn write_state(&self, xid: Xid, state: TxnState) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(state_offset(xid)))?;
        file.write_all(&[state as u8])?;
        file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_state_transitions() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.xid");

        let ledger = TransactionLedger::create(&path)?;
        let a = ledger.begin()?;
        let b = ledger.begin()?;
        let c = ledger.begin()?;
        assert_eq!((a, b, c), (1, 2, 3));

        ledger.commit(a)?;
        ledger.abort(b)?;

        assert!(ledger.is_committed(a)?);
        assert!(!ledger.is_active(a)?);
        assert!(ledger.is_aborted(b)?);
        assert!(!ledger.is_committed(b)?);
        assert!(ledger.is_active(c)?);
        assert_eq!(std::fs::metadata(&path)?.len(), 8 + 3);
        Ok(())
    }

    #[test]
    fn test_super_xid() -> Result<()> {
        let dir = tempdir().unwrap();
        let ledger = TransactionLedger::create(&dir.path().join("test.xid"))?;

        assert!(ledger.is_committed(SUPER_XID)?);
        assert!(!ledger.is_active(SUPER_XID)?);
        assert!(!ledger.is_aborted(SUPER_XID)?);
        assert!(ledger.commit(SUPER_XID).is_err());
        assert!(matches!(
            ledger.state(5),
            Err(StorageError::UnknownTransaction(5))
        ));
        Ok(())
    }

    #[test]
    fn test_reopen_keeps_states() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.xid");

        {
            let ledger = TransactionLedger::create(&path)?;
            let xid = ledger.begin()?;
            ledger.commit(xid)?;
            ledger.begin()?;
        }

        let ledger = TransactionLedger::open(&path)?;
        assert_eq!(ledger.counter(), 2);
        assert!(ledger.is_committed(1)?);
        assert!(ledger.is_active(2)?);
        assert_eq!(ledger.begin()?, 3);
        Ok(())
    }

    #[test]
    fn test_corrupt_length_is_fatal() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.xid");

        {
            let ledger = TransactionLedger::create(&path)?;
            ledger.begin()?;
        }
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(&[0, 0])?;
        drop(file);

        let err = TransactionLedger::open(&path).err().unwrap();
        assert!(matches!(err, StorageError::BadXidFile(_)));
        assert!(err.is_fatal());
        Ok(())
    }

    #[test]
    fn test_concurrent_begin_unique_ids() -> Result<()> {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(TransactionLedger::create(&dir.path().join("test.xid"))?);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || -> Result<Vec<Xid>> {
                    (0..25).map(|_| ledger.begin()).collect()
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap()?);
        }
        all.sort_unstable();
        assert_eq!(all, (1..=100).collect::<Vec<_>>());
        assert_eq!(ledger.counter(), 100);
        Ok(())
    }
}
