//! Fixtures shared by the cross-crate settlement tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use presale_core::{
    ExternalTxId, Payment, PaymentId, PaymentStatus, SaleSettings, StaticSettings,
    TransactionRecord, User, UserId,
};
use presale_gateway::SandboxGateway;
use presale_ledger::{
    AmountPolicy, LedgerReader, LedgerStore, LedgerTxn, MemoryLedger, RocksLedger, StoreError,
};
use presale_settlement::{
    EngineConfig, NewPayment, SettlementEngine, SettlementError, SettlementResult,
};
use rust_decimal::Decimal;

pub const IPN_SECRET: &str = "integration-ipn-secret";

/// Engine wired to a sandbox gateway and the given ledger.
pub struct Harness {
    pub engine: Arc<SettlementEngine>,
    pub gateway: Arc<SandboxGateway>,
    pub store: Arc<dyn LedgerStore>,
}

impl Harness {
    pub fn with_store(store: Arc<dyn LedgerStore>) -> Self {
        let gateway = Arc::new(SandboxGateway::new(IPN_SECRET));
        let engine = Arc::new(SettlementEngine::new(
            gateway.clone(),
            store.clone(),
            Arc::new(StaticSettings::new(SaleSettings::default())),
            EngineConfig {
                max_settlement_attempts: 10,
                retry_backoff_ms: 5,
            },
        ));
        Self {
            engine,
            gateway,
            store,
        }
    }

    pub fn memory() -> Self {
        Self::with_store(Arc::new(MemoryLedger::new()))
    }

    /// Register a user, optionally referred by `referrer`.
    pub fn register(&self, email: &str, referrer: Option<&User>) -> User {
        let user = User::new(email, referrer.map(|r| r.referral_code.clone()));
        self.store
            .put_user(user.clone())
            .expect("user should be stored");
        user
    }

    /// Open a BTC-paid purchase of `amount` USD.
    pub async fn open_payment(&self, buyer: &User, amount: Decimal) -> ExternalTxId {
        self.engine
            .create_payment(NewPayment {
                user_id: buyer.id,
                amount,
                pay_currency: "BTC".into(),
                quote_currency: "USD".into(),
                buyer_email: String::new(),
                buyer_name: String::new(),
                item_name: String::new(),
            })
            .await
            .expect("payment should open")
            .external_tx_id
    }

    /// Move the sandbox transaction and build its signed notification.
    pub fn notification(
        &self,
        external_tx_id: &ExternalTxId,
        code: i32,
        received: Decimal,
    ) -> (String, String) {
        self.gateway
            .set_status(external_tx_id, code, received)
            .expect("sandbox transaction exists");
        self.gateway
            .notification_for(external_tx_id)
            .expect("notification should sign")
    }

    /// Deliver a gateway notification for the given processor status code.
    pub async fn deliver(
        &self,
        external_tx_id: &ExternalTxId,
        code: i32,
        received: Decimal,
    ) -> Result<SettlementResult, SettlementError> {
        let (body, signature) = self.notification(external_tx_id, code, received);
        self.engine.handle_callback(body.as_bytes(), &signature).await
    }

    pub fn balance(&self, user: &User) -> Decimal {
        self.engine.balance(&user.id).expect("user exists")
    }

    pub fn payment(&self, external_tx_id: &ExternalTxId) -> Payment {
        self.engine
            .payment(external_tx_id)
            .expect("payment exists")
    }
}

/// A scratch directory removed on drop.
pub struct ScratchDir(PathBuf);

impl ScratchDir {
    pub fn new(label: &str) -> Self {
        Self(std::env::temp_dir().join(format!("presale-{}-{}", label, uuid::Uuid::now_v7())))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.0
    }

    pub fn open_ledger(&self) -> Arc<RocksLedger> {
        Arc::new(RocksLedger::open(&self.0).expect("ledger should open"))
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Ledger wrapper that can be armed to fail a history append inside a
/// transaction, after balances were already credited in it.
pub struct FaultyLedger {
    inner: Arc<dyn LedgerStore>,
    /// Appends left until the injected failure; zero when disarmed.
    appends_until_failure: AtomicUsize,
}

impl FaultyLedger {
    pub fn new(inner: Arc<dyn LedgerStore>) -> Self {
        Self {
            inner,
            appends_until_failure: AtomicUsize::new(0),
        }
    }

    /// Fail the `n`th history append from now (1 = the next one), once.
    pub fn fail_append(&self, n: usize) {
        self.appends_until_failure.store(n, Ordering::SeqCst);
    }

    fn should_fail_append(&self) -> bool {
        let previous = self
            .appends_until_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        previous == Ok(1)
    }
}

impl LedgerReader for FaultyLedger {
    fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        self.inner.get_user(id)
    }

    fn find_user_by_referral_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        self.inner.find_user_by_referral_code(code)
    }
}

impl LedgerStore for FaultyLedger {
    fn create_payment(&self, payment: Payment) -> Result<PaymentId, StoreError> {
        self.inner.create_payment(payment)
    }

    fn find_by_external_tx_id(
        &self,
        external_tx_id: &ExternalTxId,
    ) -> Result<Option<Payment>, StoreError> {
        self.inner.find_by_external_tx_id(external_tx_id)
    }

    fn update_status(
        &self,
        external_tx_id: &ExternalTxId,
        status: PaymentStatus,
        received_amount: Decimal,
        policy: AmountPolicy,
    ) -> Result<Payment, StoreError> {
        self.inner
            .update_status(external_tx_id, status, received_amount, policy)
    }

    fn list_open(&self) -> Result<Vec<Payment>, StoreError> {
        self.inner.list_open()
    }

    fn put_user(&self, user: User) -> Result<(), StoreError> {
        self.inner.put_user(user)
    }

    fn history_for(&self, user_id: &UserId) -> Result<Vec<TransactionRecord>, StoreError> {
        self.inner.history_for(user_id)
    }

    fn begin(&self) -> Result<Box<dyn LedgerTxn + '_>, StoreError> {
        Ok(Box::new(FaultyTxn {
            inner: self.inner.begin()?,
            ledger: self,
        }))
    }
}

struct FaultyTxn<'a> {
    inner: Box<dyn LedgerTxn + 'a>,
    ledger: &'a FaultyLedger,
}

impl LedgerReader for FaultyTxn<'_> {
    fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        self.inner.get_user(id)
    }

    fn find_user_by_referral_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        self.inner.find_user_by_referral_code(code)
    }
}

impl LedgerTxn for FaultyTxn<'_> {
    fn lock_payment(
        &mut self,
        external_tx_id: &ExternalTxId,
    ) -> Result<Option<Payment>, StoreError> {
        self.inner.lock_payment(external_tx_id)
    }

    fn put_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.inner.put_payment(payment)
    }

    fn credit_user(&mut self, user_id: &UserId, amount: Decimal) -> Result<Decimal, StoreError> {
        self.inner.credit_user(user_id, amount)
    }

    fn append_history(&mut self, record: &TransactionRecord) -> Result<(), StoreError> {
        if self.ledger.should_fail_append() {
            return Err(StoreError::Backend("injected history write failure".into()));
        }
        self.inner.append_history(record)
    }

    fn as_reader(&self) -> &dyn LedgerReader {
        self
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.commit()
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback()
    }
}
