//! Request payloads for the workflow and allocation endpoints.
//!
//! Create/update/list inputs reuse the model-level input structs directly;
//! the types here cover the small PATCH/PUT bodies.

use chrono::NaiveDate;
use serde::Deserialize;

use crate::models::AllocationRequest;

/// Body of `PATCH /invoices/:id/emit`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmitInvoiceRequest {
    pub issue_date: Option<NaiveDate>,
}

/// Body of `PATCH /invoices/:id/cancel`.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelInvoiceRequest {
    pub reason: String,
}

/// Body of `PUT /invoices/:id/due-date`.
#[derive(Debug, Clone, Deserialize)]
pub struct DueDateRequest {
    pub due_date: NaiveDate,
}

/// Body of `POST /payments/:id/allocations`.
#[derive(Debug, Clone, Deserialize)]
pub struct AllocatePaymentRequest {
    pub allocations: Vec<AllocationRequest>,
}
