//! Payment allocation model for invoicing-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Association of a portion of a payment's funds to one invoice's balance.
///
/// Reversal is a soft delete: the row keeps its audit trail and simply stops
/// counting toward the payment and invoice sums.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentAllocation {
    pub allocation_id: Uuid,
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub amount_allocated: Decimal,
    /// The payment's value date at the time of allocation.
    pub allocation_date: NaiveDate,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub reversed_by: Option<Uuid>,
    pub reversed_utc: Option<DateTime<Utc>>,
}

impl PaymentAllocation {
    pub fn is_active(&self) -> bool {
        self.reversed_utc.is_none()
    }
}

/// One entry of a batch allocation request, applied in caller order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub notes: Option<String>,
}
