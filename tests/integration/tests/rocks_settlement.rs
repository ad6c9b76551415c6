//! Integration test: settlement against the RocksDB ledger.
//!
//! Concurrency, crash-free atomicity, and persistence across reopen.

use std::sync::Arc;

use futures::future::join_all;
use presale_core::PaymentStatus;
use presale_integration_tests::{FaultyLedger, Harness, ScratchDir};
use presale_ledger::RocksLedger;
use presale_settlement::{SettlementError, SettlementResult};
use rust_decimal_macros::dec;
use tokio::sync::Barrier;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_duplicate_completions_credit_once() {
    let dir = ScratchDir::new("concurrent");
    let h = Harness::with_store(dir.open_ledger());
    let referrer = h.register("referrer@example.com", None);
    let buyer = h.register("buyer@example.com", Some(&referrer));
    let ext = h.open_payment(&buyer, dec!(100)).await;
    let (body, signature) = h.notification(&ext, 100, dec!(100));

    let start = Arc::new(Barrier::new(16));
    let tasks = (0..16).map(|_| {
        let engine = Arc::clone(&h.engine);
        let body = body.clone();
        let signature = signature.clone();
        let start = Arc::clone(&start);
        tokio::spawn(async move {
            start.wait().await;
            engine.handle_callback(body.as_bytes(), &signature).await
        })
    });
    let results = join_all(tasks).await;

    let mut settled = 0;
    for joined in results {
        match joined.unwrap() {
            Ok(SettlementResult::Settled(_)) => settled += 1,
            Ok(SettlementResult::AlreadySettled { .. }) => {}
            Ok(other) => panic!("unexpected result {:?}", other),
            // Lock contention past the retry budget is reported, never
            // applied twice.
            Err(SettlementError::SettlementConflict { .. }) => {}
            Err(e) => panic!("unexpected error {:?}", e),
        }
    }

    assert_eq!(settled, 1);
    assert_eq!(h.balance(&buyer), dec!(100));
    assert_eq!(h.balance(&referrer), dec!(5));
    assert_eq!(h.engine.history(&buyer.id).unwrap().len(), 1);
    assert_eq!(h.engine.history(&referrer.id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_settlement_rolls_back_everything() {
    let dir = ScratchDir::new("atomic");
    let ledger = Arc::new(FaultyLedger::new(dir.open_ledger()));
    let h = Harness::with_store(ledger.clone());
    let referrer = h.register("referrer@example.com", None);
    let buyer = h.register("buyer@example.com", Some(&referrer));
    let ext = h.open_payment(&buyer, dec!(100)).await;

    // Buyer credited and recorded, then the referrer's record fails.
    ledger.fail_append(2);
    let err = h.deliver(&ext, 100, dec!(100)).await.unwrap_err();
    assert!(matches!(err, SettlementError::Store(_)), "{:?}", err);

    assert_eq!(h.balance(&buyer), dec!(0));
    assert_eq!(h.balance(&referrer), dec!(0));
    assert!(h.engine.history(&buyer.id).unwrap().is_empty());
    let payment = h.payment(&ext);
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(!payment.referral_paid);

    // The gateway's retry of the same notification then succeeds.
    assert!(h.deliver(&ext, 100, dec!(100)).await.unwrap().is_settled());
    assert_eq!(h.balance(&buyer), dec!(100));
    assert_eq!(h.balance(&referrer), dec!(5));
}

#[tokio::test]
async fn test_settlement_survives_reopen() {
    let dir = ScratchDir::new("reopen");
    let (buyer, ext) = {
        let h = Harness::with_store(dir.open_ledger());
        let buyer = h.register("buyer@example.com", None);
        let ext = h.open_payment(&buyer, dec!(60)).await;
        assert!(h.deliver(&ext, 100, dec!(60)).await.unwrap().is_settled());
        (buyer, ext)
    };

    let store = Arc::new(RocksLedger::open(dir.path()).unwrap());
    let h = Harness::with_store(store);
    assert_eq!(h.balance(&buyer), dec!(60));
    let payment = h.payment(&ext);
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.credited_amount, Some(dec!(60)));
    assert!(h.store.list_open().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_many_buyers_settle_in_parallel() {
    let dir = ScratchDir::new("parallel");
    let h = Harness::with_store(dir.open_ledger());
    let referrer = h.register("referrer@example.com", None);

    let mut payments = Vec::new();
    for i in 0..8 {
        let buyer = h.register(&format!("buyer{}@example.com", i), Some(&referrer));
        let ext = h.open_payment(&buyer, dec!(20)).await;
        payments.push((buyer, h.notification(&ext, 100, dec!(20))));
    }

    let tasks = payments.iter().map(|(_, (body, signature))| {
        let engine = Arc::clone(&h.engine);
        let body = body.clone();
        let signature = signature.clone();
        tokio::spawn(async move { engine.handle_callback(body.as_bytes(), &signature).await })
    });
    for joined in join_all(tasks).await {
        assert!(joined.unwrap().unwrap().is_settled());
    }

    for (buyer, _) in &payments {
        assert_eq!(h.balance(buyer), dec!(20));
    }
    // Every commission landed on the shared referrer row.
    assert_eq!(h.balance(&referrer), dec!(8));
    assert_eq!(h.engine.history(&referrer.id).unwrap().len(), 8);
}
