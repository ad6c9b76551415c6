//! Presale Ledger
//!
//! Durable state for the settlement engine: payments with a unique index on
//! the gateway transaction id, user balances, and the append-only balance
//! history. Every multi-record change goes through a [`LedgerTxn`], which
//! either commits as a whole or leaves no trace.

pub mod error;
pub mod traits;
pub mod transaction;
pub mod memory;
pub mod rocks;

pub use error::StoreError;
pub use traits::{AmountPolicy, LedgerReader, LedgerStore, LedgerTxn};
pub use transaction::with_transaction;
pub use memory::MemoryLedger;
pub use rocks::RocksLedger;
