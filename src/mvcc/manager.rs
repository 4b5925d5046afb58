//! Version manager: transactional reads, inserts and deletes over the
//! data manager.

use crate::data::DataManager;
use crate::error::{Result, StorageError};
use crate::mvcc::entry::{self, Entry};
use crate::mvcc::transaction::{Transaction, TxnFailure};
use crate::mvcc::visibility;
use crate::mvcc::LockTable;
use crate::txn::TransactionLedger;
use crate::types::{IsolationLevel, Uid, Xid, SUPER_XID};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub struct VersionManager {
    dm: Arc<DataManager>,
    ledger: Arc<TransactionLedger>,
    /// Transactions between `begin` and `commit`/`abort`; the super
    /// transaction is always present
    active: Mutex<HashMap<Xid, Arc<Transaction>>>,
    lock_table: LockTable,
}

impl VersionManager {
    pub fn new(dm: Arc<DataManager>, ledger: Arc<TransactionLedger>) -> Self {
        let mut active = HashMap::new();
        active.insert(
            SUPER_XID,
            Arc::new(Transaction::new(
                SUPER_XID,
                IsolationLevel::ReadCommitted,
                std::iter::empty(),
            )),
        );
        Self {
            dm,
            ledger,
            active: Mutex::new(active),
            lock_table: LockTable::new(),
        }
    }

    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        // snapshot and id allocation happen under one lock
        let mut active = self.active.lock();
        let xid = self.ledger.begin()?;
        let txn = Transaction::new(xid, level, active.keys());
        active.insert(xid, Arc::new(txn));
        Ok(xid)
    }

    /// Commit `xid`. A transaction that was forced to abort reports its
    /// failure instead and stays registered until `abort`.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        let txn = self.transaction(xid)?;
        txn.check()?;
        if xid == SUPER_XID {
            return Err(StorageError::invalid_operation(
                "the super transaction cannot commit",
            ));
        }

        // committed before any waiter is handed this transaction's locks
        self.ledger.commit(xid)?;
        self.active.lock().remove(&xid);
        self.lock_table.remove(xid);
        Ok(())
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        if xid == SUPER_XID {
            return Err(StorageError::invalid_operation(
                "the super transaction cannot abort",
            ));
        }
        let txn = self.transaction(xid)?;
        self.active.lock().remove(&xid);
        self.finish_abort(&txn)
    }

    /// Abort on behalf of the transaction after a concurrency failure; it
    /// stays registered so the caller sees the failure on later calls.
    fn auto_abort(&self, txn: &Transaction, failure: TxnFailure) -> Result<StorageError> {
        txn.fail(failure);
        self.finish_abort(txn)?;
        Ok(failure.to_error())
    }

    fn finish_abort(&self, txn: &Transaction) -> Result<()> {
        if txn.mark_aborted() {
            self.ledger.abort(txn.xid)?;
            self.lock_table.remove(txn.xid);
        }
        Ok(())
    }

    /// Read a row's payload if it is visible to `xid`
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        let txn = self.transaction(xid)?;
        txn.check()?;

        let payload = self.with_entry(uid, |entry| {
            if visibility::is_visible(&self.ledger, &txn, entry.versions())? {
                Ok(Some(entry.payload()))
            } else {
                Ok(None)
            }
        })?;
        Ok(payload.flatten())
    }

    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        let txn = self.transaction(xid)?;
        txn.check()?;
        self.dm.insert(xid, &entry::wrap_entry_raw(xid, data))
    }

    /// Delete a row. Returns false if the row is not visible to `xid` or
    /// is already deleted by it.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        let txn = self.transaction(xid)?;
        txn.check()?;

        let deleted = self.with_entry(uid, |entry| {
            if !visibility::is_visible(&self.ledger, &txn, entry.versions())? {
                return Ok(false);
            }

            match self.lock_table.add(xid, uid) {
                Ok(Some(waiter)) => waiter.wait(),
                Ok(None) => {}
                Err(StorageError::DeadLock) => {
                    return Err(self.auto_abort(&txn, TxnFailure::Deadlock)?);
                }
                Err(e) => return Err(e),
            }

            let versions = entry.versions();
            if versions.1 == xid {
                return Ok(false);
            }

            if visibility::is_version_skip(&self.ledger, &txn, versions.1)? {
                tracing::warn!(xid, uid = %uid, xmax = versions.1, "version skip");
                return Err(self.auto_abort(&txn, TxnFailure::VersionSkip)?);
            }

            if !visibility::is_visible(&self.ledger, &txn, versions)? {
                return Ok(false);
            }

            entry.set_xmax(xid)?;
            Ok(true)
        })?;
        Ok(deleted.unwrap_or(false))
    }

    fn transaction(&self, xid: Xid) -> Result<Arc<Transaction>> {
        self.active
            .lock()
            .get(&xid)
            .cloned()
            .ok_or(StorageError::UnknownTransaction(xid))
    }

    /// Run `f` on the row at `uid`, releasing it afterwards. `None` if the
    /// underlying record is withdrawn.
    fn with_entry<R>(&self, uid: Uid, f: impl FnOnce(&Entry) -> Result<R>) -> Result<Option<R>> {
        let Some(item) = self.dm.read(uid)? else {
            return Ok(None);
        };
        if item.size() < entry::ENTRY_HEADER_LEN {
            self.dm.release(&item)?;
            return Err(StorageError::corruption(format!(
                "record {} is too short to be a row",
                uid
            )));
        }
        let entry = Entry::new(item);
        let result = f(&entry);
        self.dm.release(entry.item())?;
        result.map(Some)
    }
}
