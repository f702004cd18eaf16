//! Domain models for invoicing-service.

mod allocation;
mod invoice;
mod invoice_item;
mod payment;

pub use allocation::{AllocationRequest, PaymentAllocation};
pub use invoice::{
    CreateInvoice, Invoice, InvoiceAggregate, InvoiceStats, InvoiceStatus, ListInvoicesFilter,
    UpdateInvoice,
};
pub use invoice_item::{CreateInvoiceItem, InvoiceItem, UpdateInvoiceItem};
pub use payment::{
    CreatePayment, ListPaymentsFilter, Payment, PaymentDetail, PaymentMethod, PaymentStatus,
};
