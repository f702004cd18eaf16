//! In-memory store used by the integration tests and local development.
//!
//! A transaction clones the whole state at `begin`, mutates the clone, and
//! commits with an optimistic check: if any other transaction committed in
//! between, the commit fails with `ConcurrentModification`, exactly where
//! the Postgres store would surface a stale version. Row `version` stamps
//! are still bumped for parity with [`super::PgStore`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use service_core::error::AppError;

use crate::models::{
    Invoice, InvoiceItem, InvoiceStats, InvoiceStatus, ListInvoicesFilter, ListPaymentsFilter,
    Payment, PaymentAllocation,
};

use super::{Store, StoreTx};

#[derive(Debug, Clone, Default)]
struct MemState {
    generation: u64,
    invoices: HashMap<Uuid, Invoice>,
    items: HashMap<Uuid, InvoiceItem>,
    payments: HashMap<Uuid, Payment>,
    allocations: HashMap<Uuid, PaymentAllocation>,
    invoice_seq: u64,
    payment_seq: u64,
}

/// Snapshot-transactional in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<MemState>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemState>, AppError> {
        self.inner
            .lock()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("store mutex poisoned")))
    }
}

#[async_trait]
impl Store for MemStore {
    type Tx = MemTx;

    async fn begin(&self) -> Result<MemTx, AppError> {
        let state = self.lock()?;
        Ok(MemTx {
            inner: Arc::clone(&self.inner),
            base_generation: state.generation,
            snapshot: (*state).clone(),
        })
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.lock().map(|_| ())
    }
}

/// One snapshot transaction against a [`MemStore`].
pub struct MemTx {
    inner: Arc<Mutex<MemState>>,
    base_generation: u64,
    snapshot: MemState,
}

fn stale(entity: &str, id: Uuid) -> AppError {
    AppError::ConcurrentModification(anyhow::anyhow!(
        "{} {} was modified by a concurrent transaction",
        entity,
        id
    ))
}

#[async_trait]
impl StoreTx for MemTx {
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), AppError> {
        self.snapshot
            .invoices
            .insert(invoice.invoice_id, invoice.clone());
        Ok(())
    }

    async fn get_invoice(&mut self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        Ok(self.snapshot.invoices.get(&invoice_id).cloned())
    }

    async fn update_invoice(&mut self, invoice: &mut Invoice) -> Result<(), AppError> {
        let stored = self
            .snapshot
            .invoices
            .get(&invoice.invoice_id)
            .ok_or_else(|| stale("invoice", invoice.invoice_id))?;
        if stored.version != invoice.version {
            return Err(stale("invoice", invoice.invoice_id));
        }
        invoice.version += 1;
        invoice.updated_utc = Utc::now();
        self.snapshot
            .invoices
            .insert(invoice.invoice_id, invoice.clone());
        Ok(())
    }

    async fn delete_invoice(&mut self, invoice_id: Uuid) -> Result<bool, AppError> {
        let removed = self.snapshot.invoices.remove(&invoice_id).is_some();
        if removed {
            self.snapshot
                .items
                .retain(|_, item| item.invoice_id != invoice_id);
        }
        Ok(removed)
    }

    async fn list_invoices(
        &mut self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let limit = filter.page_size.clamp(1, 100) as usize;
        let mut invoices: Vec<Invoice> = self
            .snapshot
            .invoices
            .values()
            .filter(|inv| {
                filter
                    .status
                    .map_or(true, |status| inv.status == status.as_str())
                    && filter.client_ref.map_or(true, |c| inv.client_ref == c)
                    && filter.mission_ref.map_or(true, |m| inv.mission_ref == m)
                    && filter
                        .start_date
                        .map_or(true, |d| inv.issue_date.is_some_and(|i| i >= d))
                    && filter
                        .end_date
                        .map_or(true, |d| inv.issue_date.is_some_and(|i| i <= d))
                    && filter.page_token.map_or(true, |t| inv.invoice_id > t)
            })
            .cloned()
            .collect();
        invoices.sort_by_key(|inv| inv.invoice_id);
        invoices.truncate(limit);
        Ok(invoices)
    }

    async fn invoice_stats(&mut self) -> Result<InvoiceStats, AppError> {
        let mut stats = InvoiceStats {
            draft: 0,
            emitted: 0,
            partially_paid: 0,
            paid: 0,
            cancelled: 0,
            total_outstanding: Decimal::ZERO,
        };
        for invoice in self.snapshot.invoices.values() {
            match invoice.current_status() {
                InvoiceStatus::Draft => stats.draft += 1,
                InvoiceStatus::Emitted => stats.emitted += 1,
                InvoiceStatus::PartiallyPaid => stats.partially_paid += 1,
                InvoiceStatus::Paid => stats.paid += 1,
                InvoiceStatus::Cancelled => stats.cancelled += 1,
            }
            if matches!(
                invoice.current_status(),
                InvoiceStatus::Emitted | InvoiceStatus::PartiallyPaid
            ) {
                stats.total_outstanding += invoice.balance_due;
            }
        }
        Ok(stats)
    }

    async fn next_invoice_number(&mut self) -> Result<String, AppError> {
        self.snapshot.invoice_seq += 1;
        Ok(format!(
            "FACT-{}-{:04}",
            Utc::now().format("%Y%m"),
            self.snapshot.invoice_seq
        ))
    }

    async fn insert_item(&mut self, item: &InvoiceItem) -> Result<(), AppError> {
        self.snapshot.items.insert(item.item_id, item.clone());
        Ok(())
    }

    async fn get_item(&mut self, item_id: Uuid) -> Result<Option<InvoiceItem>, AppError> {
        Ok(self.snapshot.items.get(&item_id).cloned())
    }

    async fn update_item(&mut self, item: &InvoiceItem) -> Result<(), AppError> {
        self.snapshot.items.insert(item.item_id, item.clone());
        Ok(())
    }

    async fn delete_item(&mut self, invoice_id: Uuid, item_id: Uuid) -> Result<bool, AppError> {
        match self.snapshot.items.get(&item_id) {
            Some(item) if item.invoice_id == invoice_id => {
                self.snapshot.items.remove(&item_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_items(&mut self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError> {
        let mut items: Vec<InvoiceItem> = self
            .snapshot
            .items
            .values()
            .filter(|item| item.invoice_id == invoice_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| (item.sort_order, item.created_utc, item.item_id));
        Ok(items)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), AppError> {
        self.snapshot
            .payments
            .insert(payment.payment_id, payment.clone());
        Ok(())
    }

    async fn get_payment(&mut self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        Ok(self.snapshot.payments.get(&payment_id).cloned())
    }

    async fn update_payment(&mut self, payment: &mut Payment) -> Result<(), AppError> {
        let stored = self
            .snapshot
            .payments
            .get(&payment.payment_id)
            .ok_or_else(|| stale("payment", payment.payment_id))?;
        if stored.version != payment.version {
            return Err(stale("payment", payment.payment_id));
        }
        payment.version += 1;
        payment.updated_utc = Utc::now();
        self.snapshot
            .payments
            .insert(payment.payment_id, payment.clone());
        Ok(())
    }

    async fn list_payments(
        &mut self,
        filter: &ListPaymentsFilter,
    ) -> Result<Vec<Payment>, AppError> {
        let limit = filter.page_size.clamp(1, 100) as usize;
        let mut payments: Vec<Payment> = self
            .snapshot
            .payments
            .values()
            .filter(|p| {
                filter.method.map_or(true, |m| p.method == m.as_str())
                    && filter
                        .bank_account_ref
                        .map_or(true, |b| p.bank_account_ref == b)
                    && filter.start_date.map_or(true, |d| p.payment_date >= d)
                    && filter.end_date.map_or(true, |d| p.payment_date <= d)
                    && filter.page_token.map_or(true, |t| p.payment_id > t)
            })
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.payment_id);
        payments.truncate(limit);
        Ok(payments)
    }

    async fn next_payment_number(&mut self) -> Result<String, AppError> {
        self.snapshot.payment_seq += 1;
        Ok(format!(
            "PAY-{}-{:04}",
            Utc::now().format("%Y%m"),
            self.snapshot.payment_seq
        ))
    }

    async fn insert_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), AppError> {
        self.snapshot
            .allocations
            .insert(allocation.allocation_id, allocation.clone());
        Ok(())
    }

    async fn get_allocation(
        &mut self,
        allocation_id: Uuid,
    ) -> Result<Option<PaymentAllocation>, AppError> {
        Ok(self.snapshot.allocations.get(&allocation_id).cloned())
    }

    async fn update_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), AppError> {
        self.snapshot
            .allocations
            .insert(allocation.allocation_id, allocation.clone());
        Ok(())
    }

    async fn list_allocations_for_invoice(
        &mut self,
        invoice_id: Uuid,
    ) -> Result<Vec<PaymentAllocation>, AppError> {
        let mut allocations: Vec<PaymentAllocation> = self
            .snapshot
            .allocations
            .values()
            .filter(|a| a.invoice_id == invoice_id)
            .cloned()
            .collect();
        allocations.sort_by_key(|a| (a.created_utc, a.allocation_id));
        Ok(allocations)
    }

    async fn list_allocations_for_payment(
        &mut self,
        payment_id: Uuid,
    ) -> Result<Vec<PaymentAllocation>, AppError> {
        let mut allocations: Vec<PaymentAllocation> = self
            .snapshot
            .allocations
            .values()
            .filter(|a| a.payment_id == payment_id)
            .cloned()
            .collect();
        allocations.sort_by_key(|a| (a.created_utc, a.allocation_id));
        Ok(allocations)
    }

    async fn commit(self) -> Result<(), AppError> {
        let mut snapshot = self.snapshot;
        let mut state = self
            .inner
            .lock()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("store mutex poisoned")))?;
        if state.generation != self.base_generation {
            return Err(AppError::ConcurrentModification(anyhow::anyhow!(
                "store changed since transaction begin (generation {} -> {})",
                self.base_generation,
                state.generation
            )));
        }
        snapshot.generation = self.base_generation + 1;
        *state = snapshot;
        Ok(())
    }
}
