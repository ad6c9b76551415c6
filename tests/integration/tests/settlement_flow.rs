//! Integration test: purchase lifecycle across gateway, engine, and ledger.
//!
//! Drives payments through signed sandbox notifications against the
//! in-memory ledger.

use presale_core::{PaymentStatus, TransactionKind};
use presale_integration_tests::Harness;
use presale_settlement::SettlementResult;
use rust_decimal_macros::dec;

// =========================================================================
// Happy path with referral
// =========================================================================

#[tokio::test]
async fn test_referred_purchase_credits_buyer_and_referrer() {
    let h = Harness::memory();
    let referrer = h.register("referrer@example.com", None);
    let buyer = h.register("buyer@example.com", Some(&referrer));
    let ext = h.open_payment(&buyer, dec!(200)).await;

    assert_eq!(h.payment(&ext).status, PaymentStatus::Pending);
    assert_eq!(h.payment(&ext).referral_commission, dec!(10));

    let result = h.deliver(&ext, 100, dec!(200)).await.unwrap();
    let SettlementResult::Settled(receipt) = result else {
        panic!("expected settlement, got {:?}", result);
    };
    assert_eq!(receipt.credited_amount, dec!(200));
    assert_eq!(receipt.referrer, Some(referrer.id));
    assert_eq!(receipt.referral_commission, dec!(10));
    assert!(!receipt.fallback_credit);

    assert_eq!(h.balance(&buyer), dec!(200));
    assert_eq!(h.balance(&referrer), dec!(10));

    let payment = h.payment(&ext);
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert!(payment.referral_paid);
    assert_eq!(payment.credited_amount, Some(dec!(200)));
    assert!(payment.settled_at.is_some());

    let buyer_history = h.engine.history(&buyer.id).unwrap();
    assert_eq!(buyer_history.len(), 1);
    assert_eq!(buyer_history[0].kind, TransactionKind::Deposit);
    assert_eq!(buyer_history[0].external_ref, ext);

    let referrer_history = h.engine.history(&referrer.id).unwrap();
    assert_eq!(referrer_history.len(), 1);
    assert_eq!(referrer_history[0].kind, TransactionKind::ReferralCommission);
    assert_eq!(referrer_history[0].amount, dec!(10));
}

#[tokio::test]
async fn test_unreferred_purchase_pays_no_commission() {
    let h = Harness::memory();
    let buyer = h.register("solo@example.com", None);
    let ext = h.open_payment(&buyer, dec!(50)).await;

    let result = h.deliver(&ext, 100, dec!(50)).await.unwrap();
    let SettlementResult::Settled(receipt) = result else {
        panic!("expected settlement, got {:?}", result);
    };
    assert_eq!(receipt.referrer, None);
    assert_eq!(receipt.referral_commission, dec!(0));
    assert!(!h.payment(&ext).referral_paid);
}

// =========================================================================
// Idempotency
// =========================================================================

#[tokio::test]
async fn test_repeated_completion_credits_once() {
    for repeats in [1usize, 2, 100] {
        let h = Harness::memory();
        let referrer = h.register("referrer@example.com", None);
        let buyer = h.register("buyer@example.com", Some(&referrer));
        let ext = h.open_payment(&buyer, dec!(80)).await;

        let (body, signature) = h.notification(&ext, 100, dec!(80));
        let mut settled = 0;
        for _ in 0..repeats {
            let result = h
                .engine
                .handle_callback(body.as_bytes(), &signature)
                .await
                .unwrap();
            match result {
                SettlementResult::Settled(_) => settled += 1,
                SettlementResult::AlreadySettled { status, .. } => {
                    assert_eq!(status, PaymentStatus::Completed)
                }
                other => panic!("unexpected result {:?}", other),
            }
        }

        assert_eq!(settled, 1, "repeats = {}", repeats);
        assert_eq!(h.balance(&buyer), dec!(80), "repeats = {}", repeats);
        assert_eq!(h.balance(&referrer), dec!(4), "repeats = {}", repeats);
        assert_eq!(h.engine.history(&buyer.id).unwrap().len(), 1);
        assert_eq!(h.engine.history(&referrer.id).unwrap().len(), 1);
    }
}

// =========================================================================
// Partial payments and fallbacks
// =========================================================================

#[tokio::test]
async fn test_partial_then_complete() {
    let h = Harness::memory();
    let buyer = h.register("buyer@example.com", None);
    let ext = h.open_payment(&buyer, dec!(100)).await;

    let result = h.deliver(&ext, 1, dec!(30)).await.unwrap();
    assert_eq!(
        result,
        SettlementResult::StatusUpdated {
            external_tx_id: ext.clone(),
            status: PaymentStatus::Partial,
            received_amount: dec!(30),
        }
    );
    assert_eq!(h.balance(&buyer), dec!(0), "partial funds are not credited");

    let result = h.deliver(&ext, 100, dec!(100)).await.unwrap();
    assert!(result.is_settled());
    assert_eq!(h.balance(&buyer), dec!(100));
    assert_eq!(h.payment(&ext).received_amount, dec!(100));
}

#[tokio::test]
async fn test_completion_without_amount_credits_requested() {
    let h = Harness::memory();
    let buyer = h.register("buyer@example.com", None);
    let ext = h.open_payment(&buyer, dec!(75)).await;

    let result = h.deliver(&ext, 100, dec!(0)).await.unwrap();
    let SettlementResult::Settled(receipt) = result else {
        panic!("expected settlement, got {:?}", result);
    };
    assert!(receipt.fallback_credit);
    assert_eq!(receipt.credited_amount, dec!(75));
    assert_eq!(h.balance(&buyer), dec!(75));

    let payment = h.payment(&ext);
    assert!(payment.fallback_credit);
    assert_eq!(payment.credited_amount, Some(dec!(75)));
}

#[tokio::test]
async fn test_gateway_code_two_settles() {
    let h = Harness::memory();
    let buyer = h.register("buyer@example.com", None);
    let ext = h.open_payment(&buyer, dec!(12.5)).await;

    assert!(h.deliver(&ext, 2, dec!(12.5)).await.unwrap().is_settled());
    assert_eq!(h.balance(&buyer), dec!(12.5));
}

// =========================================================================
// Terminal states
// =========================================================================

#[tokio::test]
async fn test_timeout_is_final() {
    let h = Harness::memory();
    let buyer = h.register("buyer@example.com", None);
    let ext = h.open_payment(&buyer, dec!(100)).await;

    let result = h.deliver(&ext, -1, dec!(0)).await.unwrap();
    assert_eq!(
        result,
        SettlementResult::StatusUpdated {
            external_tx_id: ext.clone(),
            status: PaymentStatus::Timeout,
            received_amount: dec!(0),
        }
    );

    let late = h.deliver(&ext, 100, dec!(100)).await.unwrap();
    assert_eq!(
        late,
        SettlementResult::AlreadySettled {
            external_tx_id: ext.clone(),
            status: PaymentStatus::Timeout,
        }
    );
    assert_eq!(h.balance(&buyer), dec!(0));
    assert!(h.engine.history(&buyer.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_payment_ignores_completion() {
    let h = Harness::memory();
    let buyer = h.register("buyer@example.com", None);
    let ext = h.open_payment(&buyer, dec!(100)).await;

    h.engine.cancel_payment(&ext).await.unwrap();
    assert_eq!(h.payment(&ext).status, PaymentStatus::Cancelled);

    let result = h.deliver(&ext, 100, dec!(100)).await.unwrap();
    assert!(!result.is_settled());
    assert_eq!(h.balance(&buyer), dec!(0));
    assert!(h.store.list_open().unwrap().is_empty());
}
