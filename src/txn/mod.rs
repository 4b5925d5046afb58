//! Transaction ledger: durable per-transaction state.

mod ledger;

pub use ledger::{TransactionLedger, TxnState};
