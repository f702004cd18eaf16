//! Invoice and line item tests: creation defaults, derived totals,
//! editability gates and validation errors.

mod common;

use common::{actor, date, dec, draft_invoice_input, engine, item_input};
use invoicing_service::models::{InvoiceStatus, ListInvoicesFilter, UpdateInvoice, UpdateInvoiceItem};
use service_core::error::AppError;
use uuid::Uuid;

#[tokio::test]
async fn create_invoice_starts_as_empty_draft() {
    let engine = engine();
    let invoice = engine
        .create_invoice(&draft_invoice_input(), actor())
        .await
        .expect("Failed to create invoice");

    assert_eq!(invoice.current_status(), InvoiceStatus::Draft);
    assert_eq!(invoice.invoice_number, None);
    assert_eq!(invoice.currency, "XAF");
    assert_eq!(invoice.vat_rate, dec("19.25"));
    assert_eq!(invoice.amount_ht, dec("0"));
    assert_eq!(invoice.amount_ttc, dec("0"));
    assert_eq!(invoice.balance_due, dec("0"));
    assert_eq!(invoice.issue_date, None);
}

#[tokio::test]
async fn single_item_totals_follow_the_flat_vat_rate() {
    // qty=2, unitPrice=100, vatRate=19.25 -> 200.00 / 38.50 / 238.50
    let engine = engine();
    let actor_id = actor();
    let invoice = engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create invoice");

    let item = engine
        .add_item(invoice.invoice_id, &item_input("2", "100"), actor_id)
        .await
        .expect("Failed to add line item");
    assert_eq!(item.amount_ht, dec("200.00"));
    assert_eq!(item.amount_vat, dec("38.50"));
    assert_eq!(item.amount_ttc, dec("238.50"));
    assert_eq!(item.unit, "hour");

    let aggregate = engine
        .get_invoice(invoice.invoice_id)
        .await
        .expect("Failed to get invoice");
    assert_eq!(aggregate.invoice.amount_ht, dec("200.00"));
    assert_eq!(aggregate.invoice.amount_vat, dec("38.50"));
    assert_eq!(aggregate.invoice.amount_ttc, dec("238.50"));
    assert_eq!(aggregate.invoice.balance_due, dec("238.50"));
}

#[tokio::test]
async fn totals_reconcile_across_mixed_rate_items() {
    let engine = engine();
    let actor_id = actor();
    let invoice = engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create invoice");

    engine
        .add_item(invoice.invoice_id, &item_input("3", "45.10"), actor_id)
        .await
        .expect("Failed to add first item");
    let mut zero_rated = item_input("1", "59.99");
    zero_rated.vat_rate = Some(dec("0"));
    engine
        .add_item(invoice.invoice_id, &zero_rated, actor_id)
        .await
        .expect("Failed to add second item");

    let aggregate = engine
        .get_invoice(invoice.invoice_id)
        .await
        .expect("Failed to get invoice");
    let invoice = &aggregate.invoice;
    // amount_ttc == amount_ht + amount_vat and == sum of item TTC, exactly.
    assert_eq!(invoice.amount_ttc, invoice.amount_ht + invoice.amount_vat);
    let item_ttc_sum: rust_decimal::Decimal =
        aggregate.items.iter().map(|i| i.amount_ttc).sum();
    assert_eq!(invoice.amount_ttc, item_ttc_sum);
}

#[tokio::test]
async fn items_keep_insertion_order() {
    let engine = engine();
    let actor_id = actor();
    let invoice = engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create invoice");

    for (n, price) in ["10", "20", "30"].iter().enumerate() {
        let mut input = item_input("1", price);
        input.description = format!("Step {}", n + 1);
        engine
            .add_item(invoice.invoice_id, &input, actor_id)
            .await
            .expect("Failed to add item");
    }

    let items = engine
        .list_items(invoice.invoice_id)
        .await
        .expect("Failed to list items");
    let descriptions: Vec<&str> = items.iter().map(|i| i.description.as_str()).collect();
    assert_eq!(descriptions, vec!["Step 1", "Step 2", "Step 3"]);
}

#[tokio::test]
async fn updating_an_item_recomputes_the_totals() {
    let engine = engine();
    let actor_id = actor();
    let invoice = engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create invoice");
    let item = engine
        .add_item(invoice.invoice_id, &item_input("2", "100"), actor_id)
        .await
        .expect("Failed to add item");

    let update = UpdateInvoiceItem {
        quantity: Some(dec("5")),
        ..Default::default()
    };
    let updated = engine
        .update_item(invoice.invoice_id, item.item_id, &update, actor_id)
        .await
        .expect("Failed to update item");
    assert_eq!(updated.amount_ht, dec("500.00"));

    let aggregate = engine
        .get_invoice(invoice.invoice_id)
        .await
        .expect("Failed to get invoice");
    assert_eq!(aggregate.invoice.amount_ht, dec("500.00"));
    assert_eq!(aggregate.invoice.amount_ttc, dec("596.25"));
}

#[tokio::test]
async fn removing_the_last_item_leaves_zero_totals() {
    let engine = engine();
    let actor_id = actor();
    let invoice = engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create invoice");
    let item = engine
        .add_item(invoice.invoice_id, &item_input("2", "100"), actor_id)
        .await
        .expect("Failed to add item");

    engine
        .remove_item(invoice.invoice_id, item.item_id, actor_id)
        .await
        .expect("Failed to remove item");

    let aggregate = engine
        .get_invoice(invoice.invoice_id)
        .await
        .expect("Failed to get invoice");
    assert_eq!(aggregate.invoice.amount_ttc, dec("0.00"));
    assert!(aggregate.items.is_empty());
}

#[tokio::test]
async fn item_validation_rejects_bad_quantities_and_prices() {
    let engine = engine();
    let actor_id = actor();
    let invoice = engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create invoice");

    let zero_quantity = item_input("0", "100");
    let err = engine
        .add_item(invoice.invoice_id, &zero_quantity, actor_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));

    let negative_price = item_input("1", "-5");
    let err = engine
        .add_item(invoice.invoice_id, &negative_price, actor_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
}

#[tokio::test]
async fn create_invoice_rejects_malformed_currency() {
    let engine = engine();
    let mut input = draft_invoice_input();
    input.currency = Some("francs".to_string());
    let err = engine.create_invoice(&input, actor()).await.unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
}

#[tokio::test]
async fn missing_invoice_is_not_found() {
    let engine = engine();
    let err = engine.get_invoice(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = engine
        .add_item(Uuid::new_v4(), &item_input("1", "10"), actor())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn update_draft_header_fields() {
    let engine = engine();
    let actor_id = actor();
    let invoice = engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create invoice");

    let update = UpdateInvoice {
        payment_terms: Some("60 days net".to_string()),
        notes: Some("Second reminder sent".to_string()),
        ..Default::default()
    };
    let updated = engine
        .update_invoice(invoice.invoice_id, &update, actor_id)
        .await
        .expect("Failed to update invoice");
    assert_eq!(updated.payment_terms.as_deref(), Some("60 days net"));
    assert_eq!(updated.notes.as_deref(), Some("Second reminder sent"));

    let moved = engine
        .set_due_date(invoice.invoice_id, date(2026, 12, 31), actor_id)
        .await
        .expect("Failed to set due date");
    assert_eq!(moved.due_date, Some(date(2026, 12, 31)));
}

#[tokio::test]
async fn delete_removes_a_draft_and_its_items() {
    let engine = engine();
    let actor_id = actor();
    let invoice = engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create invoice");
    engine
        .add_item(invoice.invoice_id, &item_input("1", "10"), actor_id)
        .await
        .expect("Failed to add item");

    engine
        .delete_invoice(invoice.invoice_id)
        .await
        .expect("Failed to delete invoice");

    let err = engine.get_invoice(invoice.invoice_id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn list_invoices_filters_by_status() {
    let engine = engine();
    let actor_id = actor();
    engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create first invoice");
    common::emitted_invoice(&engine, actor_id, "1", "50").await;

    let filter = ListInvoicesFilter {
        status: Some(InvoiceStatus::Emitted),
        ..Default::default()
    };
    let emitted = engine
        .list_invoices(&filter)
        .await
        .expect("Failed to list invoices");
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].current_status(), InvoiceStatus::Emitted);

    let all = engine
        .list_invoices(&ListInvoicesFilter::default())
        .await
        .expect("Failed to list invoices");
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn stats_count_statuses_and_outstanding_balance() {
    let engine = engine();
    let actor_id = actor();
    engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create draft");
    common::emitted_invoice(&engine, actor_id, "2", "100").await;

    let stats = engine.invoice_stats().await.expect("Failed to get stats");
    assert_eq!(stats.draft, 1);
    assert_eq!(stats.emitted, 1);
    assert_eq!(stats.paid, 0);
    assert_eq!(stats.total_outstanding, dec("238.50"));
}

#[tokio::test]
async fn recompute_totals_is_idempotent() {
    let engine = engine();
    let actor_id = actor();
    let invoice = engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create invoice");
    engine
        .add_item(invoice.invoice_id, &item_input("7", "13.37"), actor_id)
        .await
        .expect("Failed to add item");

    let first = engine
        .recompute_totals(invoice.invoice_id)
        .await
        .expect("Failed to recompute");
    let second = engine
        .recompute_totals(invoice.invoice_id)
        .await
        .expect("Failed to recompute again");
    assert_eq!(first.amount_ht, second.amount_ht);
    assert_eq!(first.amount_vat, second.amount_vat);
    assert_eq!(first.amount_ttc, second.amount_ttc);
}
