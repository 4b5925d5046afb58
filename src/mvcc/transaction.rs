//! In-memory transaction handles.

use crate::error::{Result, StorageError};
use crate::types::{IsolationLevel, Xid, SUPER_XID};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Why a transaction was forced to abort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnFailure {
    /// Its lock request closed a wait-for cycle
    Deadlock,
    /// A row it wanted was changed by a transaction it cannot see
    VersionSkip,
}

impl TxnFailure {
    /// Both failures surface to the caller as a concurrent update
    pub fn to_error(self) -> StorageError {
        StorageError::ConcurrentUpdate
    }
}

pub struct Transaction {
    pub xid: Xid,
    pub level: IsolationLevel,
    /// Transactions active at `begin`; only kept for repeatable read
    snapshot: Option<HashSet<Xid>>,
    failure: Mutex<Option<TxnFailure>>,
    /// Set once the ledger abort and lock release have run
    aborted: AtomicBool,
}

impl Transaction {
    pub fn new<'a>(
        xid: Xid,
        level: IsolationLevel,
        active: impl IntoIterator<Item = &'a Xid>,
    ) -> Self {
        let snapshot = level.uses_snapshot().then(|| {
            active
                .into_iter()
                .copied()
                .filter(|&other| other != SUPER_XID)
                .collect()
        });
        Self {
            xid,
            level,
            snapshot,
            failure: Mutex::new(None),
            aborted: AtomicBool::new(false),
        }
    }

    /// Whether `xid` was active when this transaction began
    pub fn in_snapshot(&self, xid: Xid) -> bool {
        self.snapshot
            .as_ref()
            .map_or(false, |snapshot| snapshot.contains(&xid))
    }

    pub fn failure(&self) -> Option<TxnFailure> {
        *self.failure.lock()
    }

    pub fn fail(&self, failure: TxnFailure) {
        self.failure.lock().get_or_insert(failure);
    }

    /// Error out if the transaction was already forced to abort
    pub fn check(&self) -> Result<()> {
        match self.failure() {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }

    /// Claim the one-time abort; false if it already happened
    pub(crate) fn mark_aborted(&self) -> bool {
        !self.aborted.swap(true, Ordering::AcqRel)
    }
}
