//! Shared helpers for invoicing-service integration tests.
//!
//! Tests run against the engine over the in-memory store, so they exercise
//! the same code paths as production minus the Postgres backend.
#![allow(dead_code)]

use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use invoicing_service::models::{
    AllocationRequest, CreateInvoice, CreateInvoiceItem, CreatePayment, Invoice, Payment,
    PaymentMethod,
};
use invoicing_service::services::{BillingEngine, MemStore};

pub fn engine() -> BillingEngine<MemStore> {
    BillingEngine::new(MemStore::new())
}

pub fn actor() -> Uuid {
    Uuid::new_v4()
}

pub fn dec(s: &str) -> Decimal {
    s.parse().expect("bad decimal literal")
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("bad date literal")
}

pub fn draft_invoice_input() -> CreateInvoice {
    CreateInvoice {
        mission_ref: Uuid::new_v4(),
        client_ref: Uuid::new_v4(),
        currency: None,
        due_date: Some(date(2026, 9, 30)),
        payment_terms: Some("30 days net".to_string()),
        vat_rate: None,
        billing_address: Some("12 Rue des Manguiers, Douala".to_string()),
        notes: None,
    }
}

pub fn item_input(quantity: &str, unit_price: &str) -> CreateInvoiceItem {
    CreateInvoiceItem {
        description: "Consulting services".to_string(),
        quantity: dec(quantity),
        unit: None,
        unit_price: dec(unit_price),
        vat_rate: None,
    }
}

pub fn payment_input(amount: &str) -> CreatePayment {
    CreatePayment {
        amount: dec(amount),
        currency: None,
        payment_date: date(2026, 8, 15),
        method: PaymentMethod::BankTransfer,
        reference: Some("WIRE-2026-001".to_string()),
        financial_institution_ref: Some(Uuid::new_v4()),
        bank_account_ref: Uuid::new_v4(),
        notes: None,
    }
}

pub fn alloc_req(invoice_id: Uuid, amount: &str) -> AllocationRequest {
    AllocationRequest {
        invoice_id,
        amount: dec(amount),
        notes: None,
    }
}

/// Create a draft invoice with one line item and walk it through both
/// validation gates and emission.
pub async fn emitted_invoice(
    engine: &BillingEngine<MemStore>,
    actor_id: Uuid,
    quantity: &str,
    unit_price: &str,
) -> Invoice {
    let invoice = engine
        .create_invoice(&draft_invoice_input(), actor_id)
        .await
        .expect("Failed to create invoice");
    engine
        .add_item(invoice.invoice_id, &item_input(quantity, unit_price), actor_id)
        .await
        .expect("Failed to add line item");
    engine
        .mark_validated(invoice.invoice_id, actor_id)
        .await
        .expect("Failed to validate invoice");
    engine
        .validate_for_emission(invoice.invoice_id, actor_id)
        .await
        .expect("Failed to validate for emission");
    engine
        .emit_invoice(invoice.invoice_id, actor_id, Some(date(2026, 8, 1)))
        .await
        .expect("Failed to emit invoice")
}

/// Record a valid payment of the given amount.
pub async fn recorded_payment(
    engine: &BillingEngine<MemStore>,
    actor_id: Uuid,
    amount: &str,
) -> Payment {
    engine
        .record_payment(&payment_input(amount), actor_id)
        .await
        .expect("Failed to record payment")
}
