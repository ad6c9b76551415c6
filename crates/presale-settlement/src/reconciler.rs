//! Periodic sweep over open payments.
//!
//! Notifications can be lost. The reconciler polls the gateway for every
//! payment that is still open, feeds what it learns through the same
//! status-update path callbacks use, and times out payments whose window
//! has closed without funds.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use presale_core::{Payment, PaymentStatus};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::engine::SettlementEngine;
use crate::error::SettlementError;
use crate::types::SettlementResult;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub settled: usize,
    pub timed_out: usize,
    pub updated: usize,
    pub failed: usize,
}

enum Outcome {
    Settled,
    TimedOut,
    Updated,
    Unchanged,
}

pub struct Reconciler {
    engine: Arc<SettlementEngine>,
    interval: Duration,
    unavailable_grace: Duration,
}

const DEFAULT_UNAVAILABLE_GRACE: Duration = Duration::from_secs(86_400);

impl Reconciler {
    pub fn new(engine: Arc<SettlementEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            unavailable_grace: DEFAULT_UNAVAILABLE_GRACE,
        }
    }

    /// How long past expiry to keep waiting on an unreachable gateway.
    pub fn with_unavailable_grace(mut self, grace: Duration) -> Self {
        self.unavailable_grace = grace;
        self
    }

    /// Sweep until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.interval.as_secs(), "reconciler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_once().await;
                    if report.examined > 0 {
                        tracing::info!(
                            examined = report.examined,
                            settled = report.settled,
                            timed_out = report.timed_out,
                            updated = report.updated,
                            failed = report.failed,
                            "reconciliation sweep"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("reconciler stopped");
    }

    /// One pass over every open payment.
    pub async fn run_once(&self) -> ReconcileReport {
        self.run_at(Utc::now()).await
    }

    /// One pass, judging expiry against `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let open = match self.engine.store().list_open() {
            Ok(open) => open,
            Err(e) => {
                tracing::error!(error = %e, "could not list open payments");
                return report;
            }
        };

        for payment in open {
            report.examined += 1;
            match self.reconcile(&payment, now).await {
                Ok(Outcome::Settled) => report.settled += 1,
                Ok(Outcome::TimedOut) => report.timed_out += 1,
                Ok(Outcome::Updated) => report.updated += 1,
                Ok(Outcome::Unchanged) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        external_tx_id = %payment.external_tx_id,
                        error = %e,
                        "reconciliation failed for payment"
                    );
                }
            }
        }
        report
    }

    async fn reconcile(
        &self,
        payment: &Payment,
        now: DateTime<Utc>,
    ) -> Result<Outcome, SettlementError> {
        let status = match self
            .engine
            .gateway()
            .get_transaction_status(&payment.external_tx_id)
            .await
        {
            Ok(status) => status,
            Err(e) => return self.expire_unreachable(payment, now, e.into()).await,
        };
        let reported = status.payment_status();
        let received = payment.quote_equivalent(status.received_amount);

        // Funds that completed after the window still settle.
        let reported = if payment.is_expired_at(now) && reported != PaymentStatus::Completed {
            PaymentStatus::Timeout
        } else {
            reported
        };

        self.apply(payment, reported, received).await
    }

    /// The gateway could not report on `payment`. An expired payment the
    /// processor no longer knows times out at once; one behind an outage
    /// times out once the grace period has also passed.
    async fn expire_unreachable(
        &self,
        payment: &Payment,
        now: DateTime<Utc>,
        err: SettlementError,
    ) -> Result<Outcome, SettlementError> {
        let give_up = match &err {
            SettlementError::GatewayRejected(_) => payment.is_expired_at(now),
            SettlementError::GatewayUnavailable(_) => chrono::Duration::from_std(self.unavailable_grace)
                .ok()
                .and_then(|grace| payment.expires_at().checked_add_signed(grace))
                .is_some_and(|deadline| now >= deadline),
            _ => false,
        };
        if !give_up {
            return Err(err);
        }

        tracing::warn!(
            external_tx_id = %payment.external_tx_id,
            error = %err,
            "gateway cannot report on expired payment; timing it out"
        );
        self.apply(payment, PaymentStatus::Timeout, payment.received_amount)
            .await
    }

    async fn apply(
        &self,
        payment: &Payment,
        reported: PaymentStatus,
        received: Decimal,
    ) -> Result<Outcome, SettlementError> {
        let ext = &payment.external_tx_id;
        let result = match self.engine.handle_status_update(ext, reported, received).await {
            Ok(result) => result,
            // The processor can report a status the local lifecycle never
            // moves to, such as a cancel after funds arrived.
            Err(SettlementError::InvalidTransition { from, to }) => {
                tracing::debug!(external_tx_id = %ext, %from, %to, "gateway status ignored");
                return Ok(Outcome::Unchanged);
            }
            Err(e) => return Err(e),
        };
        Ok(match result {
            SettlementResult::Settled(_) => Outcome::Settled,
            SettlementResult::StatusUpdated {
                status: PaymentStatus::Timeout,
                ..
            } => Outcome::TimedOut,
            SettlementResult::StatusUpdated {
                status,
                received_amount,
                ..
            } if status != payment.status || received_amount != payment.received_amount => {
                Outcome::Updated
            }
            _ => Outcome::Unchanged,
        })
    }
}
