use crate::error::StoreError;
use crate::traits::{LedgerStore, LedgerTxn};

/// Run `f` inside a ledger transaction.
///
/// Commits when `f` returns `Ok`, rolls back when it returns `Err`. A panic
/// inside `f` drops the transaction, which also rolls it back.
pub fn with_transaction<T, E, F>(store: &dyn LedgerStore, f: F) -> Result<T, E>
where
    F: FnOnce(&mut dyn LedgerTxn) -> Result<T, E>,
    E: From<StoreError>,
{
    let mut tx = store.begin()?;
    match f(tx.as_mut()) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback() {
                tracing::error!(error = %rollback_err, "ledger rollback failed");
            }
            Err(e)
        }
    }
}
