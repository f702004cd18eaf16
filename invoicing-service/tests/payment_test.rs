//! Payment ledger tests: recording, numbering, cancellation rules.

mod common;

use common::{actor, alloc_req, dec, emitted_invoice, engine, payment_input, recorded_payment};
use invoicing_service::models::{ListPaymentsFilter, PaymentMethod, PaymentStatus};
use service_core::error::AppError;
use uuid::Uuid;

#[tokio::test]
async fn record_payment_creates_a_valid_numbered_receipt() {
    let engine = engine();
    let payment = recorded_payment(&engine, actor(), "500.00").await;

    assert_eq!(payment.current_status(), PaymentStatus::Valid);
    assert_eq!(payment.amount, dec("500.00"));
    assert_eq!(payment.currency, "XAF");
    assert!(payment.payment_number.starts_with("PAY-"));
    assert!(payment.payment_number.ends_with("-0001"));
}

#[tokio::test]
async fn record_payment_rejects_non_positive_amounts() {
    let engine = engine();
    for amount in ["0", "-10.00"] {
        let err = engine
            .record_payment(&common::payment_input(amount), actor())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }
}

#[tokio::test]
async fn payment_detail_tracks_remaining_capacity() {
    let engine = engine();
    let actor_id = actor();
    let invoice = emitted_invoice(&engine, actor_id, "2", "100").await;
    let payment = recorded_payment(&engine, actor_id, "500.00").await;

    engine
        .allocate_payment(
            payment.payment_id,
            &[alloc_req(invoice.invoice_id, "238.50")],
            actor_id,
        )
        .await
        .expect("Failed to allocate");

    let detail = engine
        .get_payment(payment.payment_id)
        .await
        .expect("Failed to get payment");
    assert_eq!(detail.amount_allocated, dec("238.50"));
    assert_eq!(detail.amount_unallocated, dec("261.50"));
    assert_eq!(detail.allocations.len(), 1);
}

#[tokio::test]
async fn cancelling_a_payment_requires_reversing_allocations_first() {
    let engine = engine();
    let actor_id = actor();
    let invoice = emitted_invoice(&engine, actor_id, "2", "100").await;
    let payment = recorded_payment(&engine, actor_id, "100.00").await;
    let allocations = engine
        .allocate_payment(
            payment.payment_id,
            &[alloc_req(invoice.invoice_id, "100.00")],
            actor_id,
        )
        .await
        .expect("Failed to allocate");

    let err = engine
        .cancel_payment(payment.payment_id, actor_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    engine
        .reverse_allocation(allocations[0].allocation_id, actor_id)
        .await
        .expect("Failed to reverse");
    let cancelled = engine
        .cancel_payment(payment.payment_id, actor_id)
        .await
        .expect("Failed to cancel payment");
    assert_eq!(cancelled.current_status(), PaymentStatus::Cancelled);

    // A cancelled payment cannot be allocated again.
    let err = engine
        .allocate_payment(
            payment.payment_id,
            &[alloc_req(invoice.invoice_id, "10.00")],
            actor_id,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    // Cancelling twice is an error, not a no-op.
    let err = engine
        .cancel_payment(payment.payment_id, actor_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn missing_payment_is_not_found() {
    let engine = engine();
    let err = engine.get_payment(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    let err = engine
        .cancel_payment(Uuid::new_v4(), actor())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn list_payments_filters_by_method() {
    let engine = engine();
    let actor_id = actor();
    recorded_payment(&engine, actor_id, "100.00").await;
    let mut by_check = payment_input("40.00");
    by_check.method = PaymentMethod::Check;
    engine
        .record_payment(&by_check, actor_id)
        .await
        .expect("Failed to record check payment");

    let filter = ListPaymentsFilter {
        method: Some(PaymentMethod::Check),
        ..Default::default()
    };
    let checks = engine
        .list_payments(&filter)
        .await
        .expect("Failed to list payments");
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].method, "check");

    let all = engine
        .list_payments(&ListPaymentsFilter::default())
        .await
        .expect("Failed to list payments");
    assert_eq!(all.len(), 2);
}
