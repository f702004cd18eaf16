//! Payment model for invoicing-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::PaymentAllocation;

/// Payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Valid,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Valid => "valid",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "cancelled" => PaymentStatus::Cancelled,
            _ => PaymentStatus::Valid,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer,
    Check,
    Cash,
    Card,
    MobileMoney,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Check => "check",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::MobileMoney => "mobile_money",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "check" => PaymentMethod::Check,
            "cash" => PaymentMethod::Cash,
            "card" => PaymentMethod::Card,
            "mobile_money" => PaymentMethod::MobileMoney,
            _ => PaymentMethod::BankTransfer,
        }
    }
}

/// Payment receipt: a pool of funds recorded against a bank account.
///
/// A payment does not belong to an invoice; allocations link the two.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub payment_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_date: NaiveDate,
    pub method: String,
    pub reference: Option<String>,
    pub status: String,
    pub financial_institution_ref: Option<Uuid>,
    pub bank_account_ref: Uuid,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub cancelled_by: Option<Uuid>,
    pub cancelled_utc: Option<DateTime<Utc>>,
    /// Optimistic concurrency stamp; bumped on every write.
    pub version: i64,
}

impl Payment {
    pub fn current_status(&self) -> PaymentStatus {
        PaymentStatus::from_string(&self.status)
    }
}

/// Input for recording a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePayment {
    pub amount: Decimal,
    pub currency: Option<String>,
    pub payment_date: NaiveDate,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub financial_institution_ref: Option<Uuid>,
    pub bank_account_ref: Uuid,
    pub notes: Option<String>,
}

/// Filter parameters for listing payments.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListPaymentsFilter {
    pub method: Option<PaymentMethod>,
    pub bank_account_ref: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

impl Default for ListPaymentsFilter {
    fn default() -> Self {
        Self {
            method: None,
            bank_account_ref: None,
            start_date: None,
            end_date: None,
            page_size: 50,
            page_token: None,
        }
    }
}

/// Payment read model with its allocation history.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentDetail {
    pub payment: Payment,
    pub allocations: Vec<PaymentAllocation>,
    /// Sum of active (non-reversed) allocations.
    pub amount_allocated: Decimal,
    pub amount_unallocated: Decimal,
}
