//! Integration test: notification authentication and ordering.

use std::collections::BTreeMap;

use presale_core::{ExternalTxId, PaymentStatus};
use presale_integration_tests::Harness;
use presale_settlement::{SettlementError, SettlementResult};
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_tampered_notification_changes_nothing() {
    let h = Harness::memory();
    let buyer = h.register("buyer@example.com", None);
    let ext = h.open_payment(&buyer, dec!(100)).await;
    let before = h.payment(&ext);

    let (body, signature) = h.notification(&ext, 100, dec!(100));
    let mut bytes = body.into_bytes();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;

    let err = h.engine.handle_callback(&bytes, &signature).await.unwrap_err();
    assert!(matches!(err, SettlementError::SignatureInvalid));
    assert_eq!(h.payment(&ext), before);
    assert_eq!(h.balance(&buyer), dec!(0));
}

#[tokio::test]
async fn test_wrong_secret_is_rejected() {
    let h = Harness::memory();
    let buyer = h.register("buyer@example.com", None);
    let ext = h.open_payment(&buyer, dec!(100)).await;

    let (body, _) = h.notification(&ext, 100, dec!(100));
    let forged = presale_gateway::signing::sign(b"not-the-secret", body.as_bytes());
    let err = h.engine.handle_callback(body.as_bytes(), &forged).await.unwrap_err();
    assert!(matches!(err, SettlementError::SignatureInvalid));
    assert_eq!(h.payment(&ext).status, PaymentStatus::Pending);

    let err = h.engine.handle_callback(body.as_bytes(), "").await.unwrap_err();
    assert!(matches!(err, SettlementError::SignatureInvalid));
}

#[tokio::test]
async fn test_signed_notification_for_unknown_transaction() {
    let h = Harness::memory();
    let mut fields = BTreeMap::new();
    fields.insert("txn_id".to_string(), "SBX99999999".to_string());
    fields.insert("status".to_string(), "100".to_string());
    fields.insert("status_text".to_string(), "Complete".to_string());
    fields.insert("received_amount".to_string(), "1".to_string());
    let (body, signature) = h.gateway.sign_callback(&fields).unwrap();

    let err = h
        .engine
        .handle_callback(body.as_bytes(), &signature)
        .await
        .unwrap_err();
    match err {
        SettlementError::UnknownTransaction(id) => {
            assert_eq!(id, ExternalTxId::new("SBX99999999").unwrap())
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_out_of_order_notifications() {
    let h = Harness::memory();
    let buyer = h.register("buyer@example.com", None);
    let ext = h.open_payment(&buyer, dec!(100)).await;

    // Captured in order, delivered newest first.
    let early = h.notification(&ext, 1, dec!(40));
    let later = h.notification(&ext, 1, dec!(70));

    let result = h
        .engine
        .handle_callback(later.0.as_bytes(), &later.1)
        .await
        .unwrap();
    assert!(matches!(result, SettlementResult::StatusUpdated { .. }));

    let result = h
        .engine
        .handle_callback(early.0.as_bytes(), &early.1)
        .await
        .unwrap();
    assert!(matches!(result, SettlementResult::Stale { .. }));
    assert_eq!(h.payment(&ext).received_amount, dec!(70));

    // A pending report after partial is stale too.
    let pending = h.notification(&ext, 0, dec!(0));
    let result = h
        .engine
        .handle_callback(pending.0.as_bytes(), &pending.1)
        .await
        .unwrap();
    assert!(matches!(result, SettlementResult::Stale { .. }));
    assert_eq!(h.payment(&ext).status, PaymentStatus::Partial);
}

#[tokio::test]
async fn test_completion_then_stale_partial() {
    let h = Harness::memory();
    let buyer = h.register("buyer@example.com", None);
    let ext = h.open_payment(&buyer, dec!(100)).await;

    let partial = h.notification(&ext, 1, dec!(50));
    assert!(h.deliver(&ext, 100, dec!(100)).await.unwrap().is_settled());

    let result = h
        .engine
        .handle_callback(partial.0.as_bytes(), &partial.1)
        .await
        .unwrap();
    assert_eq!(
        result,
        SettlementResult::AlreadySettled {
            external_tx_id: ext.clone(),
            status: PaymentStatus::Completed,
        }
    );
    assert_eq!(h.payment(&ext).received_amount, dec!(100));
    assert_eq!(h.balance(&buyer), dec!(100));
}
