//! Crash recovery.
//!
//! Runs when the validity page shows an unclean shutdown:
//!
//! 1. Truncate the page file to the highest page any log record touches.
//! 2. Redo, in log order, every record of a transaction that is no longer
//!    active.
//! 3. Undo, newest first, every record of a transaction still marked
//!    active, then mark it aborted.

use crate::buffer::BufferPool;
use crate::data::item::set_raw_invalid;
use crate::error::Result;
use crate::page::data_page;
use crate::txn::TransactionLedger;
use crate::types::{InsertRedo, PageId, Xid};
use crate::wal::{LogRecord, Wal};
use std::collections::BTreeMap;

/// What a recovery run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub truncated_to: u32,
    pub redone: usize,
    pub undone: usize,
    pub aborted: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Pass {
    Redo,
    Undo,
}

pub fn recover(
    wal: &Wal,
    pool: &dyn BufferPool,
    ledger: &TransactionLedger,
    insert_redo: InsertRedo,
) -> Result<RecoveryStats> {
    tracing::info!("recovering");
    let records = wal
        .records()?
        .iter()
        .map(|data| LogRecord::decode(data))
        .collect::<Result<Vec<_>>>()?;

    let max_page = records
        .iter()
        .map(|record| record.page_id().value())
        .max()
        .unwrap_or(0)
        .max(1);
    pool.truncate(max_page)?;
    tracing::info!(pages = max_page, "truncated page file");

    let mut stats = RecoveryStats {
        truncated_to: max_page,
        ..Default::default()
    };

    let mut active: BTreeMap<Xid, Vec<&LogRecord>> = BTreeMap::new();
    for record in &records {
        if ledger.is_active(record.xid())? {
            active.entry(record.xid()).or_default().push(record);
        } else {
            apply(pool, record, Pass::Redo, insert_redo)?;
            stats.redone += 1;
        }
    }
    tracing::info!(records = stats.redone, "redo pass done");

    for (xid, records) in &active {
        for record in records.iter().rev() {
            apply(pool, record, Pass::Undo, insert_redo)?;
            stats.undone += 1;
        }
        ledger.abort(*xid)?;
        stats.aborted += 1;
    }
    tracing::info!(
        records = stats.undone,
        transactions = stats.aborted,
        "undo pass done"
    );

    Ok(stats)
}

fn apply(pool: &dyn BufferPool, record: &LogRecord, pass: Pass, mode: InsertRedo) -> Result<()> {
    match record {
        LogRecord::Insert {
            page_id,
            offset,
            raw,
            ..
        } => {
            let withdraw = match mode {
                InsertRedo::Standard => pass == Pass::Undo,
                InsertRedo::Legacy => pass == Pass::Redo,
            };
            let mut raw = raw.clone();
            if withdraw {
                set_raw_invalid(&mut raw);
            }
            with_page(pool, *page_id, |buf| {
                data_page::recover_insert(buf, &raw, *offset)
            })
        }
        LogRecord::Update {
            uid,
            old_raw,
            new_raw,
            ..
        } => {
            let raw = match pass {
                Pass::Redo => new_raw,
                Pass::Undo => old_raw,
            };
            with_page(pool, uid.page_id(), |buf| {
                data_page::recover_update(buf, raw, uid.offset())
            })
        }
    }
}

fn with_page(
    pool: &dyn BufferPool,
    page_id: PageId,
    f: impl FnOnce(&mut [u8]) -> Result<()>,
) -> Result<()> {
    let page = pool.get_page(page_id)?;
    let applied = f(&mut page.lock_mut());
    pool.release(&page)?;
    applied
}
