//! RocksDB ledger backend.
//!
//! Uses a pessimistic `TransactionDB`: `get_for_update` takes a row lock that
//! is held until commit or rollback, so two settlers of the same payment
//! serialize on the payment row. Lock waits that exceed the configured
//! timeout surface as [`StoreError::Conflict`].

use std::path::Path;

use presale_core::{
    ExternalTxId, Payment, PaymentId, PaymentStatus, TransactionRecord, User, UserId,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, SingleThreaded,
    Transaction, TransactionDB, TransactionDBOptions,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;
use crate::traits::{
    apply_status_update, credited_balance, AmountPolicy, LedgerReader, LedgerStore, LedgerTxn,
};

const CF_PAYMENTS: &str = "payments";
const CF_PAYMENT_INDEX: &str = "payment_index";
const CF_USERS: &str = "users";
const CF_REFERRAL_CODES: &str = "referral_codes";
const CF_HISTORY: &str = "history";

const COLUMN_FAMILIES: [&str; 5] = [
    CF_PAYMENTS,
    CF_PAYMENT_INDEX,
    CF_USERS,
    CF_REFERRAL_CODES,
    CF_HISTORY,
];

/// Default row-lock wait before a transaction gives up with a conflict.
pub const DEFAULT_LOCK_TIMEOUT_MS: i64 = 2_000;

type Db = TransactionDB<SingleThreaded>;

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn code_key(code: &str) -> Vec<u8> {
    code.trim().to_ascii_uppercase().into_bytes()
}

/// History keys sort by user, then by the time-ordered record id.
fn history_key(user_id: &UserId, record_id: &uuid::Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(user_id.as_uuid().as_bytes());
    key.extend_from_slice(record_id.as_bytes());
    key
}

/// Ledger persisted in RocksDB.
pub struct RocksLedger {
    db: Db,
}

impl RocksLedger {
    /// Open or create a ledger at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_lock_timeout(path, DEFAULT_LOCK_TIMEOUT_MS)
    }

    pub fn open_with_lock_timeout(path: &Path, lock_timeout_ms: i64) -> Result<Self, StoreError> {
        std::fs::create_dir_all(path).map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(lock_timeout_ms);

        let cf_descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));

        let db: Db = TransactionDB::open_cf_descriptors(&opts, &txn_opts, path, cf_descriptors)?;
        tracing::info!(path = %path.display(), "ledger opened");
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("column family '{}' not found", name)))
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>, StoreError> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl LedgerReader for RocksLedger {
    fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        self.get_json(CF_USERS, id.as_uuid().as_bytes())
    }

    fn find_user_by_referral_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        match self.db.get_cf(self.cf(CF_REFERRAL_CODES)?, code_key(code))? {
            Some(user_id) => self.get_json(CF_USERS, &user_id),
            None => Ok(None),
        }
    }
}

impl LedgerStore for RocksLedger {
    fn create_payment(&self, payment: Payment) -> Result<PaymentId, StoreError> {
        let index = self.cf(CF_PAYMENT_INDEX)?;
        let payments = self.cf(CF_PAYMENTS)?;
        let index_key = payment.external_tx_id.as_str().as_bytes();

        let txn = self.db.transaction();
        if txn.get_for_update_cf(index, index_key, true)?.is_some() {
            return Err(StoreError::DuplicateExternalId(payment.external_tx_id));
        }
        txn.put_cf(index, index_key, payment.id.as_uuid().as_bytes())?;
        txn.put_cf(payments, payment.id.as_uuid().as_bytes(), encode(&payment)?)?;
        txn.commit()?;

        tracing::debug!(external_tx_id = %payment.external_tx_id, payment_id = %payment.id, "payment stored");
        Ok(payment.id)
    }

    fn find_by_external_tx_id(
        &self,
        external_tx_id: &ExternalTxId,
    ) -> Result<Option<Payment>, StoreError> {
        match self
            .db
            .get_cf(self.cf(CF_PAYMENT_INDEX)?, external_tx_id.as_str().as_bytes())?
        {
            Some(payment_id) => self.get_json(CF_PAYMENTS, &payment_id),
            None => Ok(None),
        }
    }

    fn update_status(
        &self,
        external_tx_id: &ExternalTxId,
        status: PaymentStatus,
        received_amount: Decimal,
        policy: AmountPolicy,
    ) -> Result<Payment, StoreError> {
        let mut tx = RocksTxn::new(self)?;
        let mut payment = tx
            .lock_payment(external_tx_id)?
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", external_tx_id)))?;
        apply_status_update(&mut payment, status, received_amount, policy)?;
        tx.put_payment(&payment)?;
        Box::new(tx).commit()?;
        Ok(payment)
    }

    fn list_open(&self) -> Result<Vec<Payment>, StoreError> {
        let mut open = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_PAYMENTS)?, IteratorMode::Start) {
            let (_, value) = item?;
            let payment: Payment = decode(&value)?;
            if !payment.status.is_terminal() {
                open.push(payment);
            }
        }
        Ok(open)
    }

    fn put_user(&self, mut user: User) -> Result<(), StoreError> {
        user.referral_code = user.referral_code.trim().to_ascii_uppercase();
        let users = self.cf(CF_USERS)?;
        let codes = self.cf(CF_REFERRAL_CODES)?;
        let user_key = user.id.as_uuid().as_bytes();
        let code = code_key(&user.referral_code);

        let txn = self.db.transaction();
        if let Some(owner) = txn.get_for_update_cf(codes, &code, true)? {
            if owner.as_slice() != user_key.as_slice() {
                return Err(StoreError::DuplicateReferralCode(user.referral_code));
            }
        }
        if let Some(previous) = txn.get_for_update_cf(users, user_key, true)? {
            let previous: User = decode(&previous)?;
            txn.delete_cf(codes, code_key(&previous.referral_code))?;
        }
        txn.put_cf(codes, &code, user_key)?;
        txn.put_cf(users, user_key, encode(&user)?)?;
        txn.commit()?;
        Ok(())
    }

    fn history_for(&self, user_id: &UserId) -> Result<Vec<TransactionRecord>, StoreError> {
        let prefix = user_id.as_uuid().as_bytes();
        let mode = IteratorMode::From(prefix, Direction::Forward);
        let mut records = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_HISTORY)?, mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            records.push(decode(&value)?);
        }
        Ok(records)
    }

    fn begin(&self) -> Result<Box<dyn LedgerTxn + '_>, StoreError> {
        Ok(Box::new(RocksTxn::new(self)?))
    }
}

/// Pessimistic RocksDB transaction. Uncommitted writes are discarded when
/// the underlying transaction is dropped.
struct RocksTxn<'a> {
    txn: Transaction<'a, Db>,
    payments: &'a ColumnFamily,
    index: &'a ColumnFamily,
    users: &'a ColumnFamily,
    codes: &'a ColumnFamily,
    history: &'a ColumnFamily,
}

impl<'a> RocksTxn<'a> {
    fn new(ledger: &'a RocksLedger) -> Result<Self, StoreError> {
        Ok(Self {
            txn: ledger.db.transaction(),
            payments: ledger.cf(CF_PAYMENTS)?,
            index: ledger.cf(CF_PAYMENT_INDEX)?,
            users: ledger.cf(CF_USERS)?,
            codes: ledger.cf(CF_REFERRAL_CODES)?,
            history: ledger.cf(CF_HISTORY)?,
        })
    }

    fn locked_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        match self
            .txn
            .get_for_update_cf(self.users, id.as_uuid().as_bytes(), true)?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl LedgerReader for RocksTxn<'_> {
    fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        match self.txn.get_cf(self.users, id.as_uuid().as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn find_user_by_referral_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        match self.txn.get_cf(self.codes, code_key(code))? {
            Some(user_id) => match self.txn.get_cf(self.users, &user_id)? {
                Some(bytes) => Ok(Some(decode(&bytes)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }
}

impl LedgerTxn for RocksTxn<'_> {
    fn lock_payment(
        &mut self,
        external_tx_id: &ExternalTxId,
    ) -> Result<Option<Payment>, StoreError> {
        let Some(payment_id) = self
            .txn
            .get_for_update_cf(self.index, external_tx_id.as_str().as_bytes(), false)?
        else {
            return Ok(None);
        };
        match self.txn.get_for_update_cf(self.payments, &payment_id, true)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Err(StoreError::Backend(format!(
                "index for {} points at a missing payment",
                external_tx_id
            ))),
        }
    }

    fn put_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.txn.put_cf(
            self.payments,
            payment.id.as_uuid().as_bytes(),
            encode(payment)?,
        )?;
        Ok(())
    }

    fn credit_user(&mut self, user_id: &UserId, amount: Decimal) -> Result<Decimal, StoreError> {
        let mut user = self
            .locked_user(user_id)?
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))?;
        user.balance = credited_balance(&user, amount)?;
        self.txn
            .put_cf(self.users, user_id.as_uuid().as_bytes(), encode(&user)?)?;
        Ok(user.balance)
    }

    fn append_history(&mut self, record: &TransactionRecord) -> Result<(), StoreError> {
        self.txn.put_cf(
            self.history,
            history_key(&record.user_id, &record.id),
            encode(record)?,
        )?;
        Ok(())
    }

    fn as_reader(&self) -> &dyn LedgerReader {
        self
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.commit()?;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.rollback()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::fixtures;
    use crate::transaction::with_transaction;
    use presale_core::TransactionKind;
    use rust_decimal_macros::dec;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("presale-ledger-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn seeded(dir: &Path) -> (RocksLedger, User) {
        let store = RocksLedger::open(dir).unwrap();
        let user = User::new("buyer@example.com", None);
        store.put_user(user.clone()).unwrap();
        (store, user)
    }

    #[test]
    fn test_open_ledger() {
        let dir = temp_dir();
        assert!(RocksLedger::open(&dir).is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_payment_roundtrip_and_unique_index() {
        let dir = temp_dir();
        let (store, user) = seeded(&dir);
        let payment = fixtures::payment("CPX1", user.id);
        store.create_payment(payment.clone()).unwrap();

        let found = store
            .find_by_external_tx_id(&payment.external_tx_id)
            .unwrap()
            .unwrap();
        assert_eq!(found, payment);

        let err = store
            .create_payment(fixtures::payment("CPX1", user.id))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateExternalId(_)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_update_status_rules() {
        let dir = temp_dir();
        let (store, user) = seeded(&dir);
        let payment = fixtures::payment("CPX1", user.id);
        store.create_payment(payment.clone()).unwrap();

        store
            .update_status(&payment.external_tx_id, PaymentStatus::Partial, dec!(60), AmountPolicy::Monotonic)
            .unwrap();
        let err = store
            .update_status(&payment.external_tx_id, PaymentStatus::Partial, dec!(10), AmountPolicy::Monotonic)
            .unwrap_err();
        assert!(matches!(err, StoreError::ReceivedAmountRegressed { .. }));

        store
            .update_status(&payment.external_tx_id, PaymentStatus::Timeout, dec!(60), AmountPolicy::Monotonic)
            .unwrap();
        assert!(store.list_open().unwrap().is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_users_and_referral_codes() {
        let dir = temp_dir();
        let (store, user) = seeded(&dir);

        let found = store
            .find_user_by_referral_code(&user.referral_code.to_lowercase())
            .unwrap()
            .unwrap();
        assert_eq!(found.id, user.id);

        let mut clash = User::new("other@example.com", None);
        clash.referral_code = user.referral_code.clone();
        assert!(matches!(
            store.put_user(clash),
            Err(StoreError::DuplicateReferralCode(_))
        ));

        // Changing a user's code releases the old one.
        let mut renamed = user.clone();
        renamed.referral_code = "NEWCODE1".into();
        store.put_user(renamed).unwrap();
        assert!(store.find_user_by_referral_code(&user.referral_code).unwrap().is_none());
        assert!(store.find_user_by_referral_code("newcode1").unwrap().is_some());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_settlement_transaction_commit_and_rollback() {
        let dir = temp_dir();
        let (store, user) = seeded(&dir);
        let payment = fixtures::payment("CPX1", user.id);
        store.create_payment(payment.clone()).unwrap();

        let failed: Result<(), StoreError> = with_transaction(&store, |tx| {
            tx.lock_payment(&payment.external_tx_id)?;
            tx.credit_user(&user.id, dec!(100))?;
            Err(StoreError::Backend("injected".into()))
        });
        assert!(failed.is_err());
        assert_eq!(store.get_user(&user.id).unwrap().unwrap().balance, Decimal::ZERO);

        let settled: Result<(), StoreError> = with_transaction(&store, |tx| {
            let mut locked = tx.lock_payment(&payment.external_tx_id)?.unwrap();
            tx.credit_user(&user.id, dec!(100))?;
            assert_eq!(tx.get_user(&user.id)?.unwrap().balance, dec!(100));
            tx.append_history(&TransactionRecord::completed(
                user.id,
                TransactionKind::Deposit,
                dec!(100),
                "USD",
                payment.external_tx_id.clone(),
            ))?;
            locked.status = PaymentStatus::Completed;
            tx.put_payment(&locked)
        });
        settled.unwrap();

        assert_eq!(store.get_user(&user.id).unwrap().unwrap().balance, dec!(100));
        let history = store.history_for(&user.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, TransactionKind::Deposit);
        assert!(store.history_for(&UserId::new()).unwrap().is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = temp_dir();
        let user_id = {
            let (store, user) = seeded(&dir);
            store.create_payment(fixtures::payment("CPX1", user.id)).unwrap();
            user.id
        };
        let store = RocksLedger::open(&dir).unwrap();
        assert!(store.get_user(&user_id).unwrap().is_some());
        assert_eq!(store.list_open().unwrap().len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_concurrent_credits_are_serialized() {
        let dir = temp_dir();
        let (store, user) = seeded(&dir);
        let store = Arc::new(store);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let user_id = user.id;
                std::thread::spawn(move || {
                    let mut done = 0;
                    while done < 10 {
                        let result: Result<Decimal, StoreError> =
                            with_transaction(&*store, |tx| tx.credit_user(&user_id, dec!(1)));
                        match result {
                            Ok(_) => done += 1,
                            Err(e) if e.is_conflict() => continue,
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get_user(&user.id).unwrap().unwrap().balance, dec!(40));

        drop(store);
        std::fs::remove_dir_all(&dir).ok();
    }
}
