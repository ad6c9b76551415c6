use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use presale_core::{
    commission_for, ExternalTxId, Payment, PaymentId, PaymentStateMachine, PaymentStatus, Quote,
    SettingsSource, TransactionKind, TransactionRecord, Transition, UserId,
};
use presale_gateway::{CreateTransaction, IpnNotification, PaymentGateway};
use presale_ledger::{with_transaction, AmountPolicy, LedgerStore, LedgerTxn, StoreError};
use rust_decimal::Decimal;

use crate::config::EngineConfig;
use crate::error::SettlementError;
use crate::referral::{ReferralCodeResolver, ReferralResolver};
use crate::types::{NewPayment, PaymentQuote, SettlementReceipt, SettlementResult};

const DEFAULT_ITEM_NAME: &str = "Presale tokens";

/// The settlement engine.
///
/// Owns no state of its own: payments, balances, and history live in the
/// injected [`LedgerStore`]; the engine only decides what to write.
pub struct SettlementEngine {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn LedgerStore>,
    resolver: Arc<dyn ReferralResolver>,
    settings: Arc<dyn SettingsSource>,
    config: EngineConfig,
}

impl SettlementEngine {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn LedgerStore>,
        settings: Arc<dyn SettingsSource>,
        config: EngineConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            resolver: Arc::new(ReferralCodeResolver),
            settings,
            config,
        }
    }

    /// Replace the referral resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn ReferralResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn gateway(&self) -> &Arc<dyn PaymentGateway> {
        &self.gateway
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Token quote for `amount` at the current supply.
    pub fn quote(&self, amount: Decimal) -> Result<Quote, SettlementError> {
        Ok(self.settings.snapshot().pricing.quote(amount)?)
    }

    /// Open a purchase: quote tokens, obtain a deposit transaction from the
    /// gateway, and persist the pending payment.
    ///
    /// Nothing is written if the gateway call fails.
    pub async fn create_payment(&self, request: NewPayment) -> Result<PaymentQuote, SettlementError> {
        if request.amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidArgument(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }
        let pay_currency = request.pay_currency.trim().to_ascii_uppercase();
        let quote_currency = request.quote_currency.trim().to_ascii_uppercase();
        if pay_currency.is_empty() || quote_currency.is_empty() {
            return Err(SettlementError::InvalidArgument(
                "pay and quote currencies are required".into(),
            ));
        }

        let user = self
            .store
            .get_user(&request.user_id)?
            .ok_or(SettlementError::UnknownUser(request.user_id))?;

        let settings = self.settings.snapshot();
        let quote = settings.pricing.quote(request.amount)?;
        let referral_commission = commission_for(request.amount, settings.commission_percent)?;

        let payment_id = PaymentId::new();
        let buyer_email = if request.buyer_email.trim().is_empty() {
            user.email.clone()
        } else {
            request.buyer_email.trim().to_string()
        };
        let item_label = if request.item_name.trim().is_empty() {
            DEFAULT_ITEM_NAME.to_string()
        } else {
            request.item_name.trim().to_string()
        };

        let issued = self
            .gateway
            .create_transaction(&CreateTransaction {
                amount: request.amount,
                pay_currency: pay_currency.clone(),
                quote_currency: quote_currency.clone(),
                buyer_email,
                buyer_name: request.buyer_name.trim().to_string(),
                item_label,
                correlation_token: payment_id.to_string(),
            })
            .await
            .map_err(|e| {
                tracing::warn!(user_id = %user.id, payment_id = %payment_id, error = %e, "gateway refused to open transaction");
                SettlementError::from(e)
            })?;

        let now = Utc::now();
        let payment = Payment {
            id: payment_id,
            external_tx_id: issued.external_tx_id.clone(),
            user_id: user.id,
            amount: request.amount,
            pay_currency,
            quote_currency,
            pay_amount: issued.amount,
            token_amount: quote.token_amount,
            received_amount: Decimal::ZERO,
            referral_commission,
            artifacts: issued.artifacts(),
            status: PaymentStatus::Pending,
            referral_paid: false,
            credited_amount: None,
            fallback_credit: false,
            created_at: now,
            updated_at: now,
            settled_at: None,
        };
        self.store.create_payment(payment.clone())?;

        tracing::info!(
            payment_id = %payment.id,
            external_tx_id = %payment.external_tx_id,
            user_id = %payment.user_id,
            amount = %payment.amount,
            tokens = %payment.token_amount,
            "payment created"
        );

        Ok(PaymentQuote::new(&payment, &quote))
    }

    /// Apply a status report for `external_tx_id`.
    ///
    /// `received_amount` is in the payment's quote currency. Terminal
    /// payments are never touched; a `completed` report runs the settlement
    /// transaction, anything else is a plain status update.
    pub async fn handle_status_update(
        &self,
        external_tx_id: &ExternalTxId,
        reported: PaymentStatus,
        received_amount: Decimal,
    ) -> Result<SettlementResult, SettlementError> {
        if received_amount < Decimal::ZERO {
            return Err(SettlementError::InvalidArgument(format!(
                "received amount must not be negative, got {}",
                received_amount
            )));
        }

        let payment = self.load(external_tx_id)?;
        if payment.status.is_terminal() {
            tracing::info!(
                %external_tx_id,
                status = %payment.status,
                reported = %reported,
                "status report for terminal payment discarded"
            );
            return Ok(SettlementResult::AlreadySettled {
                external_tx_id: external_tx_id.clone(),
                status: payment.status,
            });
        }

        if reported == PaymentStatus::Completed {
            return self.settle(external_tx_id, received_amount).await;
        }

        let (status, amount) = match PaymentStateMachine::transition(payment.status, reported)? {
            Transition::Stale => {
                tracing::debug!(%external_tx_id, status = %payment.status, reported = %reported, "stale status report");
                return Ok(SettlementResult::Stale {
                    external_tx_id: external_tx_id.clone(),
                    status: payment.status,
                    reported,
                });
            }
            Transition::Refresh => (payment.status, received_amount),
            // Closing reports often carry no amount; keep what was seen.
            Transition::Advance(next) => (next, received_amount.max(payment.received_amount)),
        };

        match self
            .store
            .update_status(external_tx_id, status, amount, AmountPolicy::Monotonic)
        {
            Ok(updated) => {
                tracing::info!(
                    %external_tx_id,
                    status = %updated.status,
                    received = %updated.received_amount,
                    "payment status updated"
                );
                Ok(SettlementResult::StatusUpdated {
                    external_tx_id: external_tx_id.clone(),
                    status: updated.status,
                    received_amount: updated.received_amount,
                })
            }
            Err(StoreError::ReceivedAmountRegressed { stored, reported: late, .. }) => {
                tracing::debug!(%external_tx_id, %stored, reported = %late, "out-of-order amount discarded");
                Ok(SettlementResult::Stale {
                    external_tx_id: external_tx_id.clone(),
                    status: payment.status,
                    reported,
                })
            }
            // Settled or timed out between the read and the write.
            Err(StoreError::TerminalPayment { status, .. }) => Ok(SettlementResult::AlreadySettled {
                external_tx_id: external_tx_id.clone(),
                status,
            }),
            Err(e) => {
                tracing::error!(%external_tx_id, error = %e, "status update failed");
                Err(e.into())
            }
        }
    }

    /// Authenticate and apply a gateway notification.
    ///
    /// The signature is checked over the raw body before a single field is
    /// read. The notification's received amount is in the pay-in currency
    /// and is converted at the payment's fixed rate.
    pub async fn handle_callback(
        &self,
        raw_payload: &[u8],
        signature: &str,
    ) -> Result<SettlementResult, SettlementError> {
        if !self.gateway.verify_callback_signature(raw_payload, signature) {
            tracing::warn!(
                gateway = self.gateway.gateway_id(),
                bytes = raw_payload.len(),
                "callback rejected: bad signature"
            );
            return Err(SettlementError::SignatureInvalid);
        }

        let notification = IpnNotification::parse(raw_payload)?;
        let payment = self.load(&notification.external_tx_id)?;
        let received = payment.quote_equivalent(notification.received_amount);

        tracing::info!(
            external_tx_id = %notification.external_tx_id,
            code = notification.status_code,
            status_text = %notification.status_text,
            received = %notification.received_amount,
            "gateway callback"
        );

        self.handle_status_update(
            &notification.external_tx_id,
            notification.payment_status(),
            received,
        )
        .await
    }

    /// Cancel a payment that has not received funds.
    pub async fn cancel_payment(
        &self,
        external_tx_id: &ExternalTxId,
    ) -> Result<SettlementResult, SettlementError> {
        let payment = self.load(external_tx_id)?;
        self.handle_status_update(external_tx_id, PaymentStatus::Cancelled, payment.received_amount)
            .await
    }

    pub fn payment(&self, external_tx_id: &ExternalTxId) -> Result<Payment, SettlementError> {
        self.load(external_tx_id)
    }

    pub fn balance(&self, user_id: &UserId) -> Result<Decimal, SettlementError> {
        self.store
            .get_user(user_id)?
            .map(|u| u.balance)
            .ok_or(SettlementError::UnknownUser(*user_id))
    }

    pub fn history(&self, user_id: &UserId) -> Result<Vec<TransactionRecord>, SettlementError> {
        if self.store.get_user(user_id)?.is_none() {
            return Err(SettlementError::UnknownUser(*user_id));
        }
        Ok(self.store.history_for(user_id)?)
    }

    fn load(&self, external_tx_id: &ExternalTxId) -> Result<Payment, SettlementError> {
        self.store
            .find_by_external_tx_id(external_tx_id)?
            .ok_or_else(|| SettlementError::UnknownTransaction(external_tx_id.clone()))
    }

    /// Run the settlement transaction, retrying on lock conflicts.
    async fn settle(
        &self,
        external_tx_id: &ExternalTxId,
        received_amount: Decimal,
    ) -> Result<SettlementResult, SettlementError> {
        let max_attempts = self.config.max_settlement_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = self.settle_once(external_tx_id, received_amount);
            match outcome {
                Err(SettlementError::Store(StoreError::Conflict(reason))) => {
                    if attempt >= max_attempts {
                        tracing::error!(%external_tx_id, attempts = attempt, %reason, "settlement gave up on conflicts");
                        return Err(SettlementError::SettlementConflict {
                            external_tx_id: external_tx_id.clone(),
                            attempts: attempt,
                        });
                    }
                    tracing::warn!(%external_tx_id, attempt, %reason, "settlement conflict, retrying");
                    let backoff = self.config.retry_backoff_ms.saturating_mul(u64::from(attempt));
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(%external_tx_id, error = %e, "settlement rolled back");
                    return Err(e);
                }
                Ok(result) => {
                    if let SettlementResult::Settled(ref receipt) = result {
                        tracing::info!(
                            %external_tx_id,
                            buyer = %receipt.buyer,
                            credited = %receipt.credited_amount,
                            referrer = ?receipt.referrer,
                            commission = %receipt.referral_commission,
                            "payment settled"
                        );
                    }
                    return Ok(result);
                }
            }
        }
    }

    /// One attempt at the settlement transaction. Either every write below
    /// commits or none does.
    fn settle_once(
        &self,
        external_tx_id: &ExternalTxId,
        received_amount: Decimal,
    ) -> Result<SettlementResult, SettlementError> {
        with_transaction(&*self.store, |tx| {
            let mut payment = tx
                .lock_payment(external_tx_id)?
                .ok_or_else(|| SettlementError::UnknownTransaction(external_tx_id.clone()))?;

            // A concurrent settler may have finished while we waited on the lock.
            if payment.status.is_terminal() {
                return Ok(SettlementResult::AlreadySettled {
                    external_tx_id: external_tx_id.clone(),
                    status: payment.status,
                });
            }
            PaymentStateMachine::transition(payment.status, PaymentStatus::Completed)?;

            let fallback = received_amount.is_zero();
            let credited = if fallback {
                tracing::warn!(
                    %external_tx_id,
                    requested = %payment.amount,
                    "completed with nothing received, crediting requested amount"
                );
                payment.amount
            } else {
                received_amount
            };

            tx.credit_user(&payment.user_id, credited)?;
            tx.append_history(&TransactionRecord::completed(
                payment.user_id,
                TransactionKind::Deposit,
                credited,
                payment.quote_currency.clone(),
                external_tx_id.clone(),
            ))?;

            let referrer = self.resolver.resolve(tx.as_reader(), &payment.user_id)?;
            let commission = self.pay_referral(tx, &payment, referrer)?;

            let now = Utc::now();
            payment.status = PaymentStatus::Completed;
            payment.received_amount = received_amount.max(payment.received_amount);
            payment.credited_amount = Some(credited);
            payment.fallback_credit = fallback;
            payment.referral_paid = payment.referral_paid || !commission.is_zero();
            payment.updated_at = now;
            payment.settled_at = Some(now);
            tx.put_payment(&payment)?;

            Ok(SettlementResult::Settled(SettlementReceipt {
                payment_id: payment.id,
                external_tx_id: external_tx_id.clone(),
                buyer: payment.user_id,
                credited_amount: credited,
                fallback_credit: fallback,
                referrer,
                referral_commission: commission,
                settled_at: now,
            }))
        })
    }

    /// Credit the referrer's commission if one is owed. Returns what was paid.
    fn pay_referral(
        &self,
        tx: &mut dyn LedgerTxn,
        payment: &Payment,
        referrer: Option<UserId>,
    ) -> Result<Decimal, SettlementError> {
        let Some(referrer) = referrer else {
            return Ok(Decimal::ZERO);
        };
        if payment.referral_paid || payment.referral_commission <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }

        tx.credit_user(&referrer, payment.referral_commission)?;
        tx.append_history(&TransactionRecord::completed(
            referrer,
            TransactionKind::ReferralCommission,
            payment.referral_commission,
            payment.quote_currency.clone(),
            payment.external_tx_id.clone(),
        ))?;
        Ok(payment.referral_commission)
    }
}
