use chrono::Utc;
use presale_core::{
    ExternalTxId, Payment, PaymentId, PaymentStatus, TransactionRecord, User, UserId,
};
use rust_decimal::Decimal;

use crate::error::StoreError;

/// How `update_status` treats a received amount lower than the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountPolicy {
    /// Regressions are rejected; out-of-order notifications cannot lower
    /// the recorded amount.
    Monotonic,
    /// Explicit correction: the reported amount replaces the stored one.
    Reconcile,
}

/// Read access shared by the store and its transactions.
pub trait LedgerReader {
    fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError>;

    fn find_user_by_referral_code(&self, code: &str) -> Result<Option<User>, StoreError>;
}

/// Persistent ledger of payments, users, and balance history.
///
/// Single-record operations are atomic on their own. Anything that must move
/// balances and payment state together goes through [`LedgerStore::begin`].
pub trait LedgerStore: LedgerReader + Send + Sync {
    /// Insert a new payment. Fails with `DuplicateExternalId` if the gateway
    /// id is already indexed.
    fn create_payment(&self, payment: Payment) -> Result<PaymentId, StoreError>;

    fn find_by_external_tx_id(
        &self,
        external_tx_id: &ExternalTxId,
    ) -> Result<Option<Payment>, StoreError>;

    /// Record a non-completing status report. Terminal payments are never
    /// modified, and `completed` can only be written inside a settlement
    /// transaction.
    fn update_status(
        &self,
        external_tx_id: &ExternalTxId,
        status: PaymentStatus,
        received_amount: Decimal,
        policy: AmountPolicy,
    ) -> Result<Payment, StoreError>;

    /// All payments not yet in a terminal state.
    fn list_open(&self) -> Result<Vec<Payment>, StoreError>;

    /// Insert or replace a user and index its referral code.
    fn put_user(&self, user: User) -> Result<(), StoreError>;

    /// A user's history, oldest first.
    fn history_for(&self, user_id: &UserId) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Start an isolated transaction. Dropping it uncommitted rolls back.
    fn begin(&self) -> Result<Box<dyn LedgerTxn + '_>, StoreError>;
}

/// An open ledger transaction.
///
/// Reads observe the transaction's own uncommitted writes. Nothing becomes
/// visible to other readers before `commit`.
pub trait LedgerTxn: LedgerReader {
    /// Read a payment and take its row lock for the rest of the transaction.
    fn lock_payment(&mut self, external_tx_id: &ExternalTxId)
        -> Result<Option<Payment>, StoreError>;

    /// Overwrite a payment previously read through `lock_payment`.
    fn put_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;

    /// Add `amount` to a user's balance and return the new balance.
    fn credit_user(&mut self, user_id: &UserId, amount: Decimal) -> Result<Decimal, StoreError>;

    fn append_history(&mut self, record: &TransactionRecord) -> Result<(), StoreError>;

    /// This transaction as a plain reader, for helpers that only look things up.
    fn as_reader(&self) -> &dyn LedgerReader;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Apply a status report to a stored payment, enforcing the rules every
/// backend shares.
pub(crate) fn apply_status_update(
    payment: &mut Payment,
    status: PaymentStatus,
    received_amount: Decimal,
    policy: AmountPolicy,
) -> Result<(), StoreError> {
    if payment.status.is_terminal() {
        return Err(StoreError::TerminalPayment {
            external_tx_id: payment.external_tx_id.clone(),
            status: payment.status,
        });
    }
    if status == PaymentStatus::Completed {
        return Err(StoreError::InvalidUpdate(format!(
            "{}: completion must go through a settlement transaction",
            payment.external_tx_id
        )));
    }
    if received_amount < Decimal::ZERO {
        return Err(StoreError::InvalidUpdate(format!(
            "{}: received amount must not be negative",
            payment.external_tx_id
        )));
    }
    if policy == AmountPolicy::Monotonic && received_amount < payment.received_amount {
        return Err(StoreError::ReceivedAmountRegressed {
            external_tx_id: payment.external_tx_id.clone(),
            stored: payment.received_amount,
            reported: received_amount,
        });
    }

    payment.status = status;
    payment.received_amount = received_amount;
    payment.updated_at = Utc::now();
    Ok(())
}

/// Balance after crediting `amount`; credits are strictly additive.
pub(crate) fn credited_balance(user: &User, amount: Decimal) -> Result<Decimal, StoreError> {
    if amount < Decimal::ZERO {
        return Err(StoreError::InvalidUpdate(format!(
            "credit for user {} must not be negative",
            user.id
        )));
    }
    user.balance
        .checked_add(amount)
        .ok_or_else(|| StoreError::InvalidUpdate(format!("balance overflow for user {}", user.id)))
}


#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_monotonic_rejects_regression() {
        let mut p = fixtures::payment("tx-1", UserId::new());
        apply_status_update(&mut p, PaymentStatus::Partial, dec!(60), AmountPolicy::Monotonic)
            .unwrap();
        let err = apply_status_update(&mut p, PaymentStatus::Partial, dec!(40), AmountPolicy::Monotonic)
            .unwrap_err();
        assert!(matches!(err, StoreError::ReceivedAmountRegressed { .. }));
        assert_eq!(p.received_amount, dec!(60));
    }

    #[test]
    fn test_reconcile_allows_correction() {
        let mut p = fixtures::payment("tx-1", UserId::new());
        p.received_amount = dec!(60);
        apply_status_update(&mut p, PaymentStatus::Partial, dec!(40), AmountPolicy::Reconcile)
            .unwrap();
        assert_eq!(p.received_amount, dec!(40));
    }

    #[test]
    fn test_terminal_and_completed_are_refused() {
        let mut p = fixtures::payment("tx-1", UserId::new());
        let err = apply_status_update(&mut p, PaymentStatus::Completed, dec!(100), AmountPolicy::Monotonic)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidUpdate(_)));

        p.status = PaymentStatus::Timeout;
        let err = apply_status_update(&mut p, PaymentStatus::Partial, dec!(1), AmountPolicy::Reconcile)
            .unwrap_err();
        assert!(matches!(err, StoreError::TerminalPayment { .. }));
    }

    #[test]
    fn test_negative_credit_is_refused() {
        let user = User::new("a@example.com", None);
        assert!(credited_balance(&user, dec!(-1)).is_err());
        assert_eq!(credited_balance(&user, dec!(2.5)).unwrap(), dec!(2.5));
    }
}
