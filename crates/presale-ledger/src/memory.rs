use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use presale_core::{
    ExternalTxId, Payment, PaymentId, PaymentStatus, TransactionRecord, User, UserId,
};
use rust_decimal::Decimal;

use crate::error::StoreError;
use crate::traits::{
    apply_status_update, credited_balance, AmountPolicy, LedgerReader, LedgerStore, LedgerTxn,
};

#[derive(Debug, Default)]
struct LedgerState {
    payments: HashMap<PaymentId, Payment>,
    /// External id -> payment id. The uniqueness constraint.
    payment_index: HashMap<ExternalTxId, PaymentId>,
    users: HashMap<UserId, User>,
    referral_codes: HashMap<String, UserId>,
    history: Vec<TransactionRecord>,
}

impl LedgerState {
    fn payment_by_external(&self, external_tx_id: &ExternalTxId) -> Option<&Payment> {
        self.payment_index
            .get(external_tx_id)
            .and_then(|id| self.payments.get(id))
    }

    fn user_by_code(&self, code: &str) -> Option<&User> {
        self.referral_codes
            .get(&normalize_code(code))
            .and_then(|id| self.users.get(id))
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// In-process ledger.
///
/// All state sits behind one mutex. A transaction holds the guard for its
/// whole lifetime, which serializes settlement the way a row lock would, and
/// stages its writes until commit. Never hold a transaction across an
/// `.await`.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // Writers only touch shared state in `commit`, which cannot panic
        // half-way, so a poisoned guard still holds consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LedgerReader for MemoryLedger {
    fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.get(id).cloned())
    }

    fn find_user_by_referral_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        Ok(self.lock().user_by_code(code).cloned())
    }
}

impl LedgerStore for MemoryLedger {
    fn create_payment(&self, payment: Payment) -> Result<PaymentId, StoreError> {
        let mut state = self.lock();
        if state.payment_index.contains_key(&payment.external_tx_id) {
            return Err(StoreError::DuplicateExternalId(payment.external_tx_id));
        }
        let id = payment.id;
        state.payment_index.insert(payment.external_tx_id.clone(), id);
        state.payments.insert(id, payment);
        Ok(id)
    }

    fn find_by_external_tx_id(
        &self,
        external_tx_id: &ExternalTxId,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self.lock().payment_by_external(external_tx_id).cloned())
    }

    fn update_status(
        &self,
        external_tx_id: &ExternalTxId,
        status: PaymentStatus,
        received_amount: Decimal,
        policy: AmountPolicy,
    ) -> Result<Payment, StoreError> {
        let mut state = self.lock();
        let id = *state
            .payment_index
            .get(external_tx_id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", external_tx_id)))?;
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", id)))?;

        let mut updated = payment.clone();
        apply_status_update(&mut updated, status, received_amount, policy)?;
        *payment = updated.clone();
        Ok(updated)
    }

    fn list_open(&self) -> Result<Vec<Payment>, StoreError> {
        let state = self.lock();
        let mut open: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| !p.status.is_terminal())
            .cloned()
            .collect();
        open.sort_by_key(|p| p.id);
        Ok(open)
    }

    fn put_user(&self, mut user: User) -> Result<(), StoreError> {
        user.referral_code = normalize_code(&user.referral_code);
        let mut state = self.lock();
        if let Some(owner) = state.referral_codes.get(&user.referral_code) {
            if *owner != user.id {
                return Err(StoreError::DuplicateReferralCode(user.referral_code));
            }
        }
        if let Some(previous) = state.users.get(&user.id) {
            let old_code = previous.referral_code.clone();
            state.referral_codes.remove(&old_code);
        }
        state.referral_codes.insert(user.referral_code.clone(), user.id);
        state.users.insert(user.id, user);
        Ok(())
    }

    fn history_for(&self, user_id: &UserId) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(self
            .lock()
            .history
            .iter()
            .filter(|r| r.user_id == *user_id)
            .cloned()
            .collect())
    }

    fn begin(&self) -> Result<Box<dyn LedgerTxn + '_>, StoreError> {
        Ok(Box::new(MemoryTxn {
            state: self.lock(),
            payments: HashMap::new(),
            users: HashMap::new(),
            history: Vec::new(),
        }))
    }
}

/// Exclusive transaction over a [`MemoryLedger`]. Writes are staged in the
/// write-set and applied to the shared state only on commit.
struct MemoryTxn<'a> {
    state: MutexGuard<'a, LedgerState>,
    payments: HashMap<PaymentId, Payment>,
    users: HashMap<UserId, User>,
    history: Vec<TransactionRecord>,
}

impl MemoryTxn<'_> {
    fn current_user(&self, id: &UserId) -> Option<&User> {
        self.users.get(id).or_else(|| self.state.users.get(id))
    }
}

impl LedgerReader for MemoryTxn<'_> {
    fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        Ok(self.current_user(id).cloned())
    }

    fn find_user_by_referral_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .state
            .referral_codes
            .get(&normalize_code(code))
            .and_then(|id| self.current_user(id))
            .cloned())
    }
}

impl LedgerTxn for MemoryTxn<'_> {
    fn lock_payment(
        &mut self,
        external_tx_id: &ExternalTxId,
    ) -> Result<Option<Payment>, StoreError> {
        let Some(id) = self.state.payment_index.get(external_tx_id).copied() else {
            return Ok(None);
        };
        Ok(self
            .payments
            .get(&id)
            .or_else(|| self.state.payments.get(&id))
            .cloned())
    }

    fn put_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        match self.state.payment_index.get(&payment.external_tx_id) {
            Some(id) if *id == payment.id => {
                self.payments.insert(payment.id, payment.clone());
                Ok(())
            }
            _ => Err(StoreError::NotFound(format!("payment {}", payment.external_tx_id))),
        }
    }

    fn credit_user(&mut self, user_id: &UserId, amount: Decimal) -> Result<Decimal, StoreError> {
        let mut user = self
            .current_user(user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))?;
        user.balance = credited_balance(&user, amount)?;
        let balance = user.balance;
        self.users.insert(user.id, user);
        Ok(balance)
    }

    fn append_history(&mut self, record: &TransactionRecord) -> Result<(), StoreError> {
        self.history.push(record.clone());
        Ok(())
    }

    fn as_reader(&self) -> &dyn LedgerReader {
        self
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTxn {
            mut state,
            payments,
            users,
            history,
        } = *self;
        state.payments.extend(payments);
        state.users.extend(users);
        state.history.extend(history);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
