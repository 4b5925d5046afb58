//! Row visibility rules.

use crate::error::Result;
use crate::mvcc::Transaction;
use crate::txn::TransactionLedger;
use crate::types::{IsolationLevel, Xid};

/// Whether the row version `(xmin, xmax)` is visible to `txn`
pub fn is_visible(
    ledger: &TransactionLedger,
    txn: &Transaction,
    (xmin, xmax): (Xid, Xid),
) -> Result<bool> {
    match txn.level {
        IsolationLevel::ReadCommitted => read_committed(ledger, txn, xmin, xmax),
        IsolationLevel::RepeatableRead => repeatable_read(ledger, txn, xmin, xmax),
    }
}

/// Whether the row was deleted by a committed transaction `txn` cannot see.
///
/// Read committed never skips versions.
pub fn is_version_skip(ledger: &TransactionLedger, txn: &Transaction, xmax: Xid) -> Result<bool> {
    if txn.level == IsolationLevel::ReadCommitted || xmax == 0 {
        return Ok(false);
    }
    Ok(ledger.is_committed(xmax)? && (xmax > txn.xid || txn.in_snapshot(xmax)))
}

fn read_committed(ledger: &TransactionLedger, txn: &Transaction, xmin: Xid, xmax: Xid) -> Result<bool> {
    let xid = txn.xid;
    if xmin == xid && xmax == 0 {
        return Ok(true);
    }

    if ledger.is_committed(xmin)? {
        if xmax == 0 {
            return Ok(true);
        }
        if xmax != xid && !ledger.is_committed(xmax)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn repeatable_read(ledger: &TransactionLedger, txn: &Transaction, xmin: Xid, xmax: Xid) -> Result<bool> {
    let xid = txn.xid;
    if xmin == xid && xmax == 0 {
        return Ok(true);
    }

    if ledger.is_committed(xmin)? && xmin < xid && !txn.in_snapshot(xmin) {
        if xmax == 0 {
            return Ok(true);
        }
        if xmax != xid
            && (!ledger.is_committed(xmax)? || xmax > xid || txn.in_snapshot(xmax))
        {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SUPER_XID;
    use tempfile::tempdir;

    #[test]
    fn test_read_committed_rules() -> Result<()> {
        let dir = tempdir().unwrap();
        let ledger = TransactionLedger::create(&dir.path().join("test.xid"))?;
        let writer = ledger.begin()?;
        let reader = ledger.begin()?;
        let txn = Transaction::new(reader, IsolationLevel::ReadCommitted, std::iter::empty());

        // own insert
        assert!(is_visible(&ledger, &txn, (reader, 0))?);
        // uncommitted insert of another transaction
        assert!(!is_visible(&ledger, &txn, (writer, 0))?);
        // deleted by self
        assert!(!is_visible(&ledger, &txn, (SUPER_XID, reader))?);
        // deleted by an uncommitted transaction
        assert!(is_visible(&ledger, &txn, (SUPER_XID, writer))?);

        ledger.commit(writer)?;
        assert!(is_visible(&ledger, &txn, (writer, 0))?);
        assert!(!is_visible(&ledger, &txn, (SUPER_XID, writer))?);
        assert!(!is_version_skip(&ledger, &txn, writer)?);
        Ok(())
    }

    #[test]
    fn test_repeatable_read_rules() -> Result<()> {
        let dir = tempdir().unwrap();
        let ledger = TransactionLedger::create(&dir.path().join("test.xid"))?;
        let early = ledger.begin()?;
        ledger.commit(early)?;
        let concurrent = ledger.begin()?;
        let reader = ledger.begin()?;
        let later = ledger.begin()?;
        let txn = Transaction::new(reader, IsolationLevel::RepeatableRead, &[concurrent]);

        ledger.commit(concurrent)?;
        ledger.commit(later)?;

        assert!(is_visible(&ledger, &txn, (early, 0))?);
        // committed, but active when the reader began
        assert!(!is_visible(&ledger, &txn, (concurrent, 0))?);
        // committed, but started after the reader
        assert!(!is_visible(&ledger, &txn, (later, 0))?);
        // deletes the reader cannot see leave the row visible
        assert!(is_visible(&ledger, &txn, (early, concurrent))?);
        assert!(is_visible(&ledger, &txn, (early, later))?);

        assert!(is_version_skip(&ledger, &txn, concurrent)?);
        assert!(is_version_skip(&ledger, &txn, later)?);
        assert!(!is_version_skip(&ledger, &txn, early)?);
        Ok(())
    }
}
