//! Persistence interface for the billing engine.
//!
//! The engine never talks to a connection pool directly; it receives a
//! [`Store`] and opens one [`StoreTx`] per operation. Mutating operations
//! read the rows they touch, recompute derived fields, write, and commit
//! atomically — dropping an uncommitted transaction discards everything.
//!
//! Concurrency contract: `get_invoice` / `get_payment` take a row-level lock
//! in transactional backends (Postgres `SELECT … FOR UPDATE`); every
//! Invoice/Payment row carries a `version` stamp and a stale write fails
//! with `ConcurrentModification`. Lock order is payment before invoice —
//! every operation that touches both acquires them in that order.

mod memory;
mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use service_core::error::AppError;

use crate::models::{
    Invoice, InvoiceItem, InvoiceStats, ListInvoicesFilter, ListPaymentsFilter, Payment,
    PaymentAllocation,
};

/// Handle to a transactional row store.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    type Tx: StoreTx;

    /// Begin a transaction. One per engine operation.
    async fn begin(&self) -> Result<Self::Tx, AppError>;

    /// Cheap liveness probe for readiness checks.
    async fn health_check(&self) -> Result<(), AppError>;
}

/// One transaction against the store.
///
/// `update_*` for Invoice/Payment check the row's `version` against the
/// value carried by the struct and bump it (plus `updated_utc`) in place on
/// success, so a later write in the same transaction stays consistent.
#[async_trait]
pub trait StoreTx: Send {
    // -- invoices -------------------------------------------------------

    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), AppError>;
    async fn get_invoice(&mut self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;
    async fn update_invoice(&mut self, invoice: &mut Invoice) -> Result<(), AppError>;
    /// Deletes the invoice and its line items. Returns false when absent.
    async fn delete_invoice(&mut self, invoice_id: Uuid) -> Result<bool, AppError>;
    async fn list_invoices(
        &mut self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError>;
    async fn invoice_stats(&mut self) -> Result<InvoiceStats, AppError>;
    /// Next value of the invoice numbering sequence, already formatted.
    /// Strictly monotonic and collision-free across concurrent emitters.
    async fn next_invoice_number(&mut self) -> Result<String, AppError>;

    // -- line items -----------------------------------------------------

    async fn insert_item(&mut self, item: &InvoiceItem) -> Result<(), AppError>;
    async fn get_item(&mut self, item_id: Uuid) -> Result<Option<InvoiceItem>, AppError>;
    async fn update_item(&mut self, item: &InvoiceItem) -> Result<(), AppError>;
    async fn delete_item(&mut self, invoice_id: Uuid, item_id: Uuid) -> Result<bool, AppError>;
    /// Items of one invoice, insertion order preserved.
    async fn list_items(&mut self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError>;

    // -- payments -------------------------------------------------------

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), AppError>;
    async fn get_payment(&mut self, payment_id: Uuid) -> Result<Option<Payment>, AppError>;
    async fn update_payment(&mut self, payment: &mut Payment) -> Result<(), AppError>;
    async fn list_payments(
        &mut self,
        filter: &ListPaymentsFilter,
    ) -> Result<Vec<Payment>, AppError>;
    async fn next_payment_number(&mut self) -> Result<String, AppError>;

    // -- allocations ----------------------------------------------------

    async fn insert_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), AppError>;
    async fn get_allocation(
        &mut self,
        allocation_id: Uuid,
    ) -> Result<Option<PaymentAllocation>, AppError>;
    async fn update_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), AppError>;
    async fn list_allocations_for_invoice(
        &mut self,
        invoice_id: Uuid,
    ) -> Result<Vec<PaymentAllocation>, AppError>;
    async fn list_allocations_for_payment(
        &mut self,
        payment_id: Uuid,
    ) -> Result<Vec<PaymentAllocation>, AppError>;

    /// Commit the transaction. Consumes the handle; dropping instead rolls
    /// everything back.
    async fn commit(self) -> Result<(), AppError>;
}
