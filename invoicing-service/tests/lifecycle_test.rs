//! Workflow lifecycle tests: validation gates, emission, numbering and
//! cancellation.

mod common;

use common::{actor, date, draft_invoice_input, emitted_invoice, engine, item_input};
use invoicing_service::models::InvoiceStatus;
use service_core::error::AppError;

#[tokio::test]
async fn emission_assigns_a_sequential_number_once() {
    let engine = engine();
    let actor_id = actor();

    let invoice = emitted_invoice(&engine, actor_id, "2", "100").await;
    assert_eq!(invoice.current_status(), InvoiceStatus::Emitted);
    assert_eq!(invoice.issue_date, Some(date(2026, 8, 1)));
    let number = invoice.invoice_number.expect("emitted invoice must carry a number");
    assert!(number.starts_with("FACT-"));
    assert!(number.ends_with("-0001"));

    let second = emitted_invoice(&engine, actor_id, "1", "10").await;
    let second_number = second.invoice_number.expect("missing number");
    assert!(second_number.ends_with("-0002"));
    assert!(second_number > number);
}

#[tokio::test]
async fn numbers_are_never_reused_after_cancellation() {
    let engine = engine();
    let actor_id = actor();

    let first = emitted_invoice(&engine, actor_id, "1", "100").await;
    engine
        .cancel_invoice(first.invoice_id, actor_id, "duplicate entry")
        .await
        .expect("Failed to cancel invoice");

    let second = emitted_invoice(&engine, actor_id, "1", "100").await;
    assert_ne!(second.invoice_number, first.invoice_number);
    assert!(second.invoice_number.expect("missing number").ends_with("-0002"));
}

#[tokio::test]
async fn emit_requires_both_validation_gates_in_order() {
    let engine = engine();
    let actor_id = actor();
    let invoice = engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create invoice");
    engine
        .add_item(invoice.invoice_id, &item_input("1", "100"), actor_id)
        .await
        .expect("Failed to add item");

    // Emission validation before validation fails.
    let err = engine
        .validate_for_emission(invoice.invoice_id, actor_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    // Emitting before either gate fails.
    let err = engine
        .emit_invoice(invoice.invoice_id, actor_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let validated = engine
        .mark_validated(invoice.invoice_id, actor_id)
        .await
        .expect("Failed to validate");
    assert_eq!(validated.validated_by, Some(actor_id));

    let ready = engine
        .validate_for_emission(invoice.invoice_id, actor_id)
        .await
        .expect("Failed to validate for emission");
    assert_eq!(ready.emission_validated_by, Some(actor_id));

    let emitted = engine
        .emit_invoice(invoice.invoice_id, actor_id, None)
        .await
        .expect("Failed to emit");
    assert_eq!(emitted.current_status(), InvoiceStatus::Emitted);
    assert_eq!(emitted.emitted_by, Some(actor_id));
}

#[tokio::test]
async fn item_changes_invalidate_the_validation_gates() {
    let engine = engine();
    let actor_id = actor();
    let invoice = engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create invoice");
    engine
        .add_item(invoice.invoice_id, &item_input("1", "100"), actor_id)
        .await
        .expect("Failed to add item");
    engine
        .mark_validated(invoice.invoice_id, actor_id)
        .await
        .expect("Failed to validate");
    engine
        .validate_for_emission(invoice.invoice_id, actor_id)
        .await
        .expect("Failed to validate for emission");

    // The validated content changed: both marks are cleared.
    engine
        .add_item(invoice.invoice_id, &item_input("1", "50"), actor_id)
        .await
        .expect("Failed to add item");
    let aggregate = engine
        .get_invoice(invoice.invoice_id)
        .await
        .expect("Failed to get invoice");
    assert_eq!(aggregate.invoice.validated_by, None);
    assert_eq!(aggregate.invoice.emission_validated_by, None);

    let err = engine
        .emit_invoice(invoice.invoice_id, actor_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn an_invoice_without_items_cannot_pass_the_gates() {
    let engine = engine();
    let actor_id = actor();
    let invoice = engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create invoice");

    let err = engine
        .mark_validated(invoice.invoice_id, actor_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    // Zero-total invoices are equally blocked: add then remove the item.
    let item = engine
        .add_item(invoice.invoice_id, &item_input("1", "100"), actor_id)
        .await
        .expect("Failed to add item");
    engine
        .remove_item(invoice.invoice_id, item.item_id, actor_id)
        .await
        .expect("Failed to remove item");
    let err = engine
        .mark_validated(invoice.invoice_id, actor_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn adding_an_item_to_an_emitted_invoice_fails() {
    let engine = engine();
    let actor_id = actor();
    let invoice = emitted_invoice(&engine, actor_id, "2", "100").await;

    let err = engine
        .add_item(invoice.invoice_id, &item_input("1", "10"), actor_id)
        .await
        .unwrap_err();
    match err {
        AppError::InvalidState(inner) => {
            let message = inner.to_string();
            assert!(message.contains("emitted"));
            assert!(message.contains("draft"));
        }
        other => panic!("expected InvalidState, got {:?}", other),
    }

    // Header edits and deletion are frozen too.
    let err = engine
        .set_due_date(invoice.invoice_id, date(2027, 1, 1), actor_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
    let err = engine.delete_invoice(invoice.invoice_id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn a_draft_invoice_never_carries_a_number() {
    let engine = engine();
    let actor_id = actor();
    let invoice = engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create invoice");
    engine
        .add_item(invoice.invoice_id, &item_input("1", "100"), actor_id)
        .await
        .expect("Failed to add item");
    engine
        .mark_validated(invoice.invoice_id, actor_id)
        .await
        .expect("Failed to validate");
    engine
        .validate_for_emission(invoice.invoice_id, actor_id)
        .await
        .expect("Failed to validate for emission");

    let aggregate = engine
        .get_invoice(invoice.invoice_id)
        .await
        .expect("Failed to get invoice");
    assert_eq!(aggregate.invoice.current_status(), InvoiceStatus::Draft);
    assert_eq!(aggregate.invoice.invoice_number, None);
}

#[tokio::test]
async fn cancellation_is_allowed_from_draft_and_emitted_only_with_reason() {
    let engine = engine();
    let actor_id = actor();

    let draft = engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create invoice");
    let err = engine
        .cancel_invoice(draft.invoice_id, actor_id, "  ")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));

    let cancelled = engine
        .cancel_invoice(draft.invoice_id, actor_id, "client withdrew the order")
        .await
        .expect("Failed to cancel");
    assert_eq!(cancelled.current_status(), InvoiceStatus::Cancelled);
    assert_eq!(
        cancelled.cancellation_reason.as_deref(),
        Some("client withdrew the order")
    );

    let emitted = emitted_invoice(&engine, actor_id, "1", "75").await;
    engine
        .cancel_invoice(emitted.invoice_id, actor_id, "billing error")
        .await
        .expect("Failed to cancel emitted invoice");
}

#[tokio::test]
async fn cancelled_is_terminal() {
    let engine = engine();
    let actor_id = actor();
    let invoice = engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create invoice");
    engine
        .cancel_invoice(invoice.invoice_id, actor_id, "obsolete")
        .await
        .expect("Failed to cancel");

    let err = engine
        .emit_invoice(invoice.invoice_id, actor_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
    let err = engine
        .cancel_invoice(invoice.invoice_id, actor_id, "again")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}
