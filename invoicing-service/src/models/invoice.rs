//! Invoice model for invoicing-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{InvoiceItem, PaymentAllocation};

/// Invoice workflow status.
///
/// `paid` and `cancelled` are terminal; a separate credit-note flow (out of
/// scope) would be the only way to reopen them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Emitted,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Emitted => "emitted",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "emitted" => InvoiceStatus::Emitted,
            "partially_paid" => InvoiceStatus::PartiallyPaid,
            "paid" => InvoiceStatus::Paid,
            "cancelled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Draft,
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice row.
///
/// `amount_ht`, `amount_vat`, `amount_ttc`, `amount_paid` and `balance_due`
/// are derived; the engine is their only writer.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    /// Assigned exactly once at emission; never reused.
    pub invoice_number: Option<String>,
    pub mission_ref: Uuid,
    pub client_ref: Uuid,
    pub currency: String,
    pub status: String,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub payment_terms: Option<String>,
    pub vat_rate: Decimal,
    pub billing_address: Option<String>,
    pub notes: Option<String>,
    pub amount_ht: Decimal,
    pub amount_vat: Decimal,
    pub amount_ttc: Decimal,
    pub amount_paid: Decimal,
    pub balance_due: Decimal,
    pub first_payment_date: Option<NaiveDate>,
    pub last_payment_date: Option<NaiveDate>,
    pub payment_count: i32,
    pub validated_by: Option<Uuid>,
    pub validated_utc: Option<DateTime<Utc>>,
    pub emission_validated_by: Option<Uuid>,
    pub emission_validated_utc: Option<DateTime<Utc>>,
    pub emitted_by: Option<Uuid>,
    pub emitted_utc: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub cancelled_utc: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    /// Optimistic concurrency stamp; bumped on every write.
    pub version: i64,
}

impl Invoice {
    pub fn current_status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }
}

/// Input for creating a draft invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub mission_ref: Uuid,
    pub client_ref: Uuid,
    pub currency: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub payment_terms: Option<String>,
    pub vat_rate: Option<Decimal>,
    pub billing_address: Option<String>,
    pub notes: Option<String>,
}

/// Input for updating a draft invoice's header fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateInvoice {
    pub due_date: Option<NaiveDate>,
    pub payment_terms: Option<String>,
    pub vat_rate: Option<Decimal>,
    pub billing_address: Option<String>,
    pub notes: Option<String>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub client_ref: Option<Uuid>,
    pub mission_ref: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

impl Default for ListInvoicesFilter {
    fn default() -> Self {
        Self {
            status: None,
            client_ref: None,
            mission_ref: None,
            start_date: None,
            end_date: None,
            page_size: 50,
            page_token: None,
        }
    }
}

/// Full read model of an invoice: row, line items, allocation history.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceAggregate {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
    pub allocations: Vec<PaymentAllocation>,
}

/// Per-status counts plus outstanding balance across open invoices.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceStats {
    pub draft: i64,
    pub emitted: i64,
    pub partially_paid: i64,
    pub paid: i64,
    pub cancelled: i64,
    pub total_outstanding: Decimal,
}
