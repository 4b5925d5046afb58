//! Record lock table with deadlock detection.
//!
//! Each uid has at most one holder. A transaction asking for a held uid
//! joins that uid's FIFO queue and blocks on a [`LockWaiter`]. Every
//! transaction waits on at most one uid, so the wait-for graph seen from
//! the requester is a single chain `xid -> uid -> holder -> uid -> ...`;
//! reaching a transaction twice on that chain is a cycle.

use crate::error::{Result, StorageError};
use crate::types::{Uid, Xid};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Handle a blocked lock request waits on
pub struct LockWaiter {
    granted: Mutex<bool>,
    cond: Condvar,
}

impl LockWaiter {
    fn new() -> Self {
        Self {
            granted: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Block until the lock is handed over
    pub fn wait(&self) {
        let mut granted = self.granted.lock();
        while !*granted {
            self.cond.wait(&mut granted);
        }
    }

    pub fn is_granted(&self) -> bool {
        *self.granted.lock()
    }

    fn grant(&self) {
        *self.granted.lock() = true;
        self.cond.notify_all();
    }
}

#[derive(Default)]
struct LockState {
    /// Uids each transaction holds
    holding: HashMap<Xid, Vec<Uid>>,
    /// Holder of each uid
    holder: HashMap<Uid, Xid>,
    /// Transactions queued on each uid
    queue: HashMap<Uid, VecDeque<Xid>>,
    /// Uid each blocked transaction waits on
    waits_on: HashMap<Xid, Uid>,
    /// Handle of each blocked transaction
    waiters: HashMap<Xid, Arc<LockWaiter>>,
}

impl LockState {
    fn grant(&mut self, xid: Xid, uid: Uid) {
        self.holder.insert(uid, xid);
        self.holding.entry(xid).or_default().push(uid);
    }

    fn dequeue(&mut self, xid: Xid, uid: Uid) {
        if let Some(queue) = self.queue.get_mut(&uid) {
            queue.retain(|&queued| queued != xid);
            if queue.is_empty() {
                self.queue.remove(&uid);
            }
        }
    }

    fn has_deadlock(&self, start: Xid) -> bool {
        let mut seen = HashSet::new();
        let mut current = start;
        loop {
            if !seen.insert(current) {
                return true;
            }
            let Some(uid) = self.waits_on.get(&current) else {
                return false;
            };
            let Some(&holder) = self.holder.get(uid) else {
                return false;
            };
            current = holder;
        }
    }

    /// Hand a released uid to the first queued transaction still waiting
    fn pass_on(&mut self, uid: Uid) {
        self.holder.remove(&uid);
        while let Some(next) = self.queue.get_mut(&uid).and_then(VecDeque::pop_front) {
            if let Some(waiter) = self.waiters.remove(&next) {
                self.waits_on.remove(&next);
                self.grant(next, uid);
                waiter.grant();
                break;
            }
        }
        if self.queue.get(&uid).map_or(false, VecDeque::is_empty) {
            self.queue.remove(&uid);
        }
    }
}

#[derive(Default)]
pub struct LockTable {
    state: Mutex<LockState>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request `uid` for `xid`.
    ///
    /// Returns `None` if the lock is held on return, or a waiter to block
    /// on until it is handed over. Fails with `DeadLock` if waiting would
    /// close a cycle; the request is then withdrawn.
    pub fn add(&self, xid: Xid, uid: Uid) -> Result<Option<Arc<LockWaiter>>> {
        let mut state = self.state.lock();

        if state
            .holding
            .get(&xid)
            .map_or(false, |uids| uids.contains(&uid))
        {
            return Ok(None);
        }

        if !state.holder.contains_key(&uid) {
            state.grant(xid, uid);
            return Ok(None);
        }

        state.waits_on.insert(xid, uid);
        state.queue.entry(uid).or_default().push_back(xid);

        if state.has_deadlock(xid) {
            state.waits_on.remove(&xid);
            state.dequeue(xid, uid);
            tracing::warn!(xid, uid = %uid, "deadlock detected");
            return Err(StorageError::DeadLock);
        }

        let waiter = Arc::new(LockWaiter::new());
        state.waiters.insert(xid, Arc::clone(&waiter));
        Ok(Some(waiter))
    }

    /// Release everything `xid` holds and withdraw its pending request
    pub fn remove(&self, xid: Xid) {
        let mut state = self.state.lock();

        if let Some(uid) = state.waits_on.remove(&xid) {
            state.dequeue(xid, uid);
        }
        state.waiters.remove(&xid);

        for uid in state.holding.remove(&xid).unwrap_or_default() {
            state.pass_on(uid);
        }
    }

    /// Current holder of a uid
    pub fn holder(&self, uid: Uid) -> Option<Xid> {
        self.state.lock().holder.get(&uid).copied()
    }
}
