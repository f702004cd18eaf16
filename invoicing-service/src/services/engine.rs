//! The billing engine: invoice lifecycle and payment allocation.
//!
//! Every mutating operation runs inside a single store transaction: read
//! the rows it touches (with row locks), recompute derived totals, write,
//! commit. The engine is the only writer of `amount_ht`, `amount_vat`,
//! `amount_ttc`, `amount_paid` and `balance_due`.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, instrument};
use uuid::Uuid;

use service_core::error::AppError;

use crate::models::{
    AllocationRequest, CreateInvoice, CreateInvoiceItem, CreatePayment, Invoice, InvoiceAggregate,
    InvoiceItem, InvoiceStats, InvoiceStatus, ListInvoicesFilter, ListPaymentsFilter, Payment,
    PaymentAllocation, PaymentDetail, PaymentStatus, UpdateInvoice, UpdateInvoiceItem,
};
use crate::money;
use crate::services::metrics::{
    ALLOCATIONS_TOTAL, ENGINE_OP_DURATION, ERRORS_TOTAL, INVOICES_TOTAL, PAYMENTS_TOTAL,
};
use crate::services::store::{Store, StoreTx};
use crate::services::workflow;

/// Invoice lifecycle and payment allocation engine over an injected store.
#[derive(Clone)]
pub struct BillingEngine<S: Store> {
    store: S,
}

fn invoice_not_found(invoice_id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("invoice {} not found", invoice_id))
}

fn payment_not_found(payment_id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("payment {} not found", payment_id))
}

/// Line items (and draft header fields) may only change while in `draft`.
fn ensure_editable(invoice: &Invoice, action: &str) -> Result<(), AppError> {
    match invoice.current_status() {
        InvoiceStatus::Draft => Ok(()),
        status => Err(AppError::InvalidState(anyhow::anyhow!(
            "invoice {} is '{}': {} requires status 'draft'",
            invoice.invoice_id,
            status,
            action
        ))),
    }
}

fn validate_item_fields(
    description: &str,
    quantity: Decimal,
    unit_price: Decimal,
    vat_rate: Decimal,
) -> Result<(), AppError> {
    if description.trim().is_empty() {
        return Err(AppError::ValidationError(anyhow::anyhow!(
            "item description must not be empty"
        )));
    }
    if quantity <= Decimal::ZERO {
        return Err(AppError::ValidationError(anyhow::anyhow!(
            "item quantity must be positive, got {}",
            quantity
        )));
    }
    if unit_price < Decimal::ZERO {
        return Err(AppError::ValidationError(anyhow::anyhow!(
            "item unit price must not be negative, got {}",
            unit_price
        )));
    }
    if vat_rate < Decimal::ZERO {
        return Err(AppError::ValidationError(anyhow::anyhow!(
            "item VAT rate must not be negative, got {}",
            vat_rate
        )));
    }
    Ok(())
}

fn validate_currency(currency: &str) -> Result<(), AppError> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(AppError::ValidationError(anyhow::anyhow!(
            "currency must be a three-letter code, got '{}'",
            currency
        )));
    }
    Ok(())
}

/// The validation marks cover a specific invoice content; once the content
/// changes they no longer apply and the gates must be re-run.
fn clear_validation_marks(invoice: &mut Invoice) {
    invoice.validated_by = None;
    invoice.validated_utc = None;
    invoice.emission_validated_by = None;
    invoice.emission_validated_utc = None;
}

/// Recompute `amount_ht`/`amount_vat`/`amount_ttc` from the line items.
/// Runs inside the transaction of the item mutation that triggered it.
async fn recompute_totals_tx<T: StoreTx>(tx: &mut T, invoice: &mut Invoice) -> Result<(), AppError> {
    let items = tx.list_items(invoice.invoice_id).await?;
    let mut amount_ht = Decimal::ZERO;
    let mut amount_vat = Decimal::ZERO;
    for item in &items {
        amount_ht += item.amount_ht;
        amount_vat += item.amount_vat;
    }
    invoice.amount_ht = money::round_money(amount_ht);
    invoice.amount_vat = money::round_money(amount_vat);
    invoice.amount_ttc = invoice.amount_ht + invoice.amount_vat;
    invoice.balance_due = invoice.amount_ttc - invoice.amount_paid;
    if invoice.balance_due < Decimal::ZERO {
        ERRORS_TOTAL
            .with_label_values(&["invariant_violation"])
            .inc();
        error!(
            invoice_id = %invoice.invoice_id,
            amount_ttc = %invoice.amount_ttc,
            amount_paid = %invoice.amount_paid,
            "recomputed total fell below the amount already paid"
        );
        return Err(AppError::InvariantViolation(anyhow::anyhow!(
            "invoice {} total {} fell below amount paid {}",
            invoice.invoice_id,
            invoice.amount_ttc,
            invoice.amount_paid
        )));
    }
    Ok(())
}

/// Recompute `amount_paid`/`balance_due` plus the payment roll-up fields
/// from the active allocations, and advance or downgrade the status.
/// A negative balance is never clamped: it aborts the transaction.
async fn recompute_payment_state_tx<T: StoreTx>(
    tx: &mut T,
    invoice: &mut Invoice,
) -> Result<(), AppError> {
    let allocations = tx.list_allocations_for_invoice(invoice.invoice_id).await?;
    let active: Vec<&PaymentAllocation> =
        allocations.iter().filter(|a| a.is_active()).collect();

    let amount_paid =
        money::round_money(active.iter().map(|a| a.amount_allocated).sum::<Decimal>());
    let balance_due = invoice.amount_ttc - amount_paid;
    if balance_due < Decimal::ZERO {
        ERRORS_TOTAL
            .with_label_values(&["invariant_violation"])
            .inc();
        error!(
            invoice_id = %invoice.invoice_id,
            amount_ttc = %invoice.amount_ttc,
            amount_paid = %amount_paid,
            "active allocations exceed the invoice total"
        );
        return Err(AppError::InvariantViolation(anyhow::anyhow!(
            "allocations against invoice {} total {} and exceed the invoice amount {}",
            invoice.invoice_id,
            amount_paid,
            invoice.amount_ttc
        )));
    }

    invoice.amount_paid = amount_paid;
    invoice.balance_due = balance_due;
    invoice.payment_count = active.len() as i32;
    invoice.first_payment_date = active.iter().map(|a| a.allocation_date).min();
    invoice.last_payment_date = active.iter().map(|a| a.allocation_date).max();

    let current = invoice.current_status();
    let next = workflow::status_for_payment_state(current, amount_paid, invoice.amount_ttc)?;
    if next != current {
        invoice.status = next.as_str().to_string();
        INVOICES_TOTAL.with_label_values(&[next.as_str()]).inc();
        info!(
            invoice_id = %invoice.invoice_id,
            from = %current,
            to = %next,
            "invoice status changed"
        );
    }
    Ok(())
}

impl<S: Store> BillingEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    /// Create a new draft invoice.
    #[instrument(skip(self, input), fields(mission_ref = %input.mission_ref))]
    pub async fn create_invoice(
        &self,
        input: &CreateInvoice,
        actor_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let timer = ENGINE_OP_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let currency = input
            .currency
            .clone()
            .unwrap_or_else(|| money::DEFAULT_CURRENCY.to_string());
        validate_currency(&currency)?;
        let vat_rate = input.vat_rate.unwrap_or_else(money::default_vat_rate);
        if vat_rate < Decimal::ZERO {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "VAT rate must not be negative, got {}",
                vat_rate
            )));
        }

        let now = Utc::now();
        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: None,
            mission_ref: input.mission_ref,
            client_ref: input.client_ref,
            currency,
            status: InvoiceStatus::Draft.as_str().to_string(),
            issue_date: None,
            due_date: input.due_date,
            payment_terms: input.payment_terms.clone(),
            vat_rate,
            billing_address: input.billing_address.clone(),
            notes: input.notes.clone(),
            amount_ht: Decimal::ZERO,
            amount_vat: Decimal::ZERO,
            amount_ttc: Decimal::ZERO,
            amount_paid: Decimal::ZERO,
            balance_due: Decimal::ZERO,
            first_payment_date: None,
            last_payment_date: None,
            payment_count: 0,
            validated_by: None,
            validated_utc: None,
            emission_validated_by: None,
            emission_validated_utc: None,
            emitted_by: None,
            emitted_utc: None,
            cancelled_by: None,
            cancelled_utc: None,
            cancellation_reason: None,
            created_by: actor_id,
            created_utc: now,
            updated_utc: now,
            version: 0,
        };

        let mut tx = self.store.begin().await?;
        tx.insert_invoice(&invoice).await?;
        tx.commit().await?;

        timer.observe_duration();
        INVOICES_TOTAL.with_label_values(&["draft"]).inc();
        info!(invoice_id = %invoice.invoice_id, "Draft invoice created");

        Ok(invoice)
    }

    /// Get the full invoice aggregate: row, line items, allocation history.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<InvoiceAggregate, AppError> {
        let mut tx = self.store.begin().await?;
        let invoice = tx
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        let items = tx.list_items(invoice_id).await?;
        let allocations = tx.list_allocations_for_invoice(invoice_id).await?;
        Ok(InvoiceAggregate {
            invoice,
            items,
            allocations,
        })
    }

    /// List invoices with filters and keyset pagination.
    #[instrument(skip(self, filter))]
    pub async fn list_invoices(
        &self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let mut tx = self.store.begin().await?;
        tx.list_invoices(filter).await
    }

    /// Per-status counts and total outstanding balance.
    #[instrument(skip(self))]
    pub async fn invoice_stats(&self) -> Result<InvoiceStats, AppError> {
        let mut tx = self.store.begin().await?;
        tx.invoice_stats().await
    }

    /// Update a draft invoice's header fields.
    #[instrument(skip(self, input), fields(invoice_id = %invoice_id))]
    pub async fn update_invoice(
        &self,
        invoice_id: Uuid,
        input: &UpdateInvoice,
        _actor_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let timer = ENGINE_OP_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let mut tx = self.store.begin().await?;
        let mut invoice = tx
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        ensure_editable(&invoice, "updating the invoice")?;

        if let Some(vat_rate) = input.vat_rate {
            if vat_rate < Decimal::ZERO {
                return Err(AppError::ValidationError(anyhow::anyhow!(
                    "VAT rate must not be negative, got {}",
                    vat_rate
                )));
            }
            invoice.vat_rate = vat_rate;
        }
        if let Some(due_date) = input.due_date {
            invoice.due_date = Some(due_date);
        }
        if let Some(payment_terms) = &input.payment_terms {
            invoice.payment_terms = Some(payment_terms.clone());
        }
        if let Some(billing_address) = &input.billing_address {
            invoice.billing_address = Some(billing_address.clone());
        }
        if let Some(notes) = &input.notes {
            invoice.notes = Some(notes.clone());
        }

        tx.update_invoice(&mut invoice).await?;
        tx.commit().await?;

        timer.observe_duration();
        info!(invoice_id = %invoice.invoice_id, "Invoice updated");
        Ok(invoice)
    }

    /// Change the due date of a draft invoice.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn set_due_date(
        &self,
        invoice_id: Uuid,
        due_date: NaiveDate,
        _actor_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let mut tx = self.store.begin().await?;
        let mut invoice = tx
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        ensure_editable(&invoice, "changing the due date")?;
        invoice.due_date = Some(due_date);
        tx.update_invoice(&mut invoice).await?;
        tx.commit().await?;
        info!(invoice_id = %invoice.invoice_id, due_date = %due_date, "Due date updated");
        Ok(invoice)
    }

    /// Delete a draft invoice and its line items.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn delete_invoice(&self, invoice_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.store.begin().await?;
        let invoice = tx
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        ensure_editable(&invoice, "deleting the invoice")?;
        tx.delete_invoice(invoice_id).await?;
        tx.commit().await?;
        info!(invoice_id = %invoice_id, "Draft invoice deleted");
        Ok(())
    }

    /// Recompute HT/VAT/TTC totals from the line items. Idempotent.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn recompute_totals(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let mut tx = self.store.begin().await?;
        let mut invoice = tx
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        recompute_totals_tx(&mut tx, &mut invoice).await?;
        tx.update_invoice(&mut invoice).await?;
        tx.commit().await?;
        Ok(invoice)
    }

    /// Recompute paid amount, balance and status from active allocations.
    /// Idempotent.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn recompute_payment_state(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let mut tx = self.store.begin().await?;
        let mut invoice = tx
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        recompute_payment_state_tx(&mut tx, &mut invoice).await?;
        tx.update_invoice(&mut invoice).await?;
        tx.commit().await?;
        Ok(invoice)
    }

    // -------------------------------------------------------------------------
    // Line Item Operations
    // -------------------------------------------------------------------------

    /// Add a line item to a draft invoice and recompute the totals.
    #[instrument(skip(self, input), fields(invoice_id = %invoice_id))]
    pub async fn add_item(
        &self,
        invoice_id: Uuid,
        input: &CreateInvoiceItem,
        _actor_id: Uuid,
    ) -> Result<InvoiceItem, AppError> {
        let timer = ENGINE_OP_DURATION
            .with_label_values(&["add_item"])
            .start_timer();

        let mut tx = self.store.begin().await?;
        let mut invoice = tx
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        ensure_editable(&invoice, "adding a line item")?;

        let vat_rate = input.vat_rate.unwrap_or(invoice.vat_rate);
        let quantity = money::round_quantity(input.quantity);
        let unit_price = money::round_money(input.unit_price);
        validate_item_fields(&input.description, quantity, unit_price, vat_rate)?;

        let existing = tx.list_items(invoice_id).await?;
        let sort_order = existing.iter().map(|i| i.sort_order).max().unwrap_or(-1) + 1;

        let (amount_ht, amount_vat, amount_ttc) =
            money::line_amounts(quantity, unit_price, vat_rate);
        let item = InvoiceItem {
            item_id: Uuid::new_v4(),
            invoice_id,
            description: input.description.clone(),
            quantity,
            unit: input.unit.clone().unwrap_or_else(|| "hour".to_string()),
            unit_price,
            vat_rate,
            amount_ht,
            amount_vat,
            amount_ttc,
            sort_order,
            created_utc: Utc::now(),
        };
        tx.insert_item(&item).await?;

        clear_validation_marks(&mut invoice);
        recompute_totals_tx(&mut tx, &mut invoice).await?;
        tx.update_invoice(&mut invoice).await?;
        tx.commit().await?;

        timer.observe_duration();
        info!(item_id = %item.item_id, amount_ttc = %item.amount_ttc, "Line item added");
        Ok(item)
    }

    /// Update a line item of a draft invoice and recompute the totals.
    #[instrument(skip(self, input), fields(invoice_id = %invoice_id, item_id = %item_id))]
    pub async fn update_item(
        &self,
        invoice_id: Uuid,
        item_id: Uuid,
        input: &UpdateInvoiceItem,
        _actor_id: Uuid,
    ) -> Result<InvoiceItem, AppError> {
        let timer = ENGINE_OP_DURATION
            .with_label_values(&["update_item"])
            .start_timer();

        let mut tx = self.store.begin().await?;
        let mut invoice = tx
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        ensure_editable(&invoice, "updating a line item")?;

        let mut item = match tx.get_item(item_id).await? {
            Some(item) if item.invoice_id == invoice_id => item,
            _ => {
                return Err(AppError::NotFound(anyhow::anyhow!(
                    "line item {} not found on invoice {}",
                    item_id,
                    invoice_id
                )))
            }
        };

        if let Some(description) = &input.description {
            item.description = description.clone();
        }
        if let Some(quantity) = input.quantity {
            item.quantity = money::round_quantity(quantity);
        }
        if let Some(unit) = &input.unit {
            item.unit = unit.clone();
        }
        if let Some(unit_price) = input.unit_price {
            item.unit_price = money::round_money(unit_price);
        }
        if let Some(vat_rate) = input.vat_rate {
            item.vat_rate = vat_rate;
        }
        validate_item_fields(&item.description, item.quantity, item.unit_price, item.vat_rate)?;

        let (amount_ht, amount_vat, amount_ttc) =
            money::line_amounts(item.quantity, item.unit_price, item.vat_rate);
        item.amount_ht = amount_ht;
        item.amount_vat = amount_vat;
        item.amount_ttc = amount_ttc;
        tx.update_item(&item).await?;

        clear_validation_marks(&mut invoice);
        recompute_totals_tx(&mut tx, &mut invoice).await?;
        tx.update_invoice(&mut invoice).await?;
        tx.commit().await?;

        timer.observe_duration();
        info!(item_id = %item.item_id, "Line item updated");
        Ok(item)
    }

    /// Remove a line item from a draft invoice and recompute the totals.
    /// Removing the last item leaves zero totals; such an invoice simply
    /// cannot be emitted.
    #[instrument(skip(self), fields(invoice_id = %invoice_id, item_id = %item_id))]
    pub async fn remove_item(
        &self,
        invoice_id: Uuid,
        item_id: Uuid,
        _actor_id: Uuid,
    ) -> Result<(), AppError> {
        let timer = ENGINE_OP_DURATION
            .with_label_values(&["remove_item"])
            .start_timer();

        let mut tx = self.store.begin().await?;
        let mut invoice = tx
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        ensure_editable(&invoice, "removing a line item")?;

        let removed = tx.delete_item(invoice_id, item_id).await?;
        if !removed {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "line item {} not found on invoice {}",
                item_id,
                invoice_id
            )));
        }

        clear_validation_marks(&mut invoice);
        recompute_totals_tx(&mut tx, &mut invoice).await?;
        tx.update_invoice(&mut invoice).await?;
        tx.commit().await?;

        timer.observe_duration();
        info!(item_id = %item_id, "Line item removed");
        Ok(())
    }

    /// List an invoice's items in insertion order.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn list_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError> {
        let mut tx = self.store.begin().await?;
        if tx.get_invoice(invoice_id).await?.is_none() {
            return Err(invoice_not_found(invoice_id));
        }
        tx.list_items(invoice_id).await
    }

    // -------------------------------------------------------------------------
    // Workflow Operations
    // -------------------------------------------------------------------------

    /// Record the validation gate on a draft invoice.
    #[instrument(skip(self), fields(invoice_id = %invoice_id, actor_id = %actor_id))]
    pub async fn mark_validated(
        &self,
        invoice_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let mut tx = self.store.begin().await?;
        let mut invoice = tx
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        ensure_editable(&invoice, "validation")?;

        let items = tx.list_items(invoice_id).await?;
        if items.is_empty() {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "invoice {} has no line items: nothing to validate",
                invoice_id
            )));
        }

        invoice.validated_by = Some(actor_id);
        invoice.validated_utc = Some(Utc::now());
        tx.update_invoice(&mut invoice).await?;
        tx.commit().await?;

        info!(invoice_id = %invoice_id, "Invoice validated");
        Ok(invoice)
    }

    /// Record the emission-validation gate on a validated draft invoice.
    #[instrument(skip(self), fields(invoice_id = %invoice_id, actor_id = %actor_id))]
    pub async fn validate_for_emission(
        &self,
        invoice_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let mut tx = self.store.begin().await?;
        let mut invoice = tx
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        ensure_editable(&invoice, "emission validation")?;

        if invoice.validated_by.is_none() {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "invoice {} has not passed validation: validate it first",
                invoice_id
            )));
        }
        let items = tx.list_items(invoice_id).await?;
        if items.is_empty() {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "invoice {} has no line items: it cannot be emitted",
                invoice_id
            )));
        }
        if invoice.amount_ttc <= Decimal::ZERO {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "invoice {} has no billable amount: it cannot be emitted",
                invoice_id
            )));
        }

        invoice.emission_validated_by = Some(actor_id);
        invoice.emission_validated_utc = Some(Utc::now());
        tx.update_invoice(&mut invoice).await?;
        tx.commit().await?;

        info!(invoice_id = %invoice_id, "Invoice validated for emission");
        Ok(invoice)
    }

    /// Emit an invoice: assign the next sequential number (exactly once)
    /// and move `draft -> emitted`.
    #[instrument(skip(self), fields(invoice_id = %invoice_id, actor_id = %actor_id))]
    pub async fn emit_invoice(
        &self,
        invoice_id: Uuid,
        actor_id: Uuid,
        issue_date: Option<NaiveDate>,
    ) -> Result<Invoice, AppError> {
        let timer = ENGINE_OP_DURATION
            .with_label_values(&["emit_invoice"])
            .start_timer();

        let mut tx = self.store.begin().await?;
        let mut invoice = tx
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        workflow::ensure_transition(invoice.current_status(), InvoiceStatus::Emitted)?;

        if invoice.emission_validated_by.is_none() {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "invoice {} has not been validated for emission",
                invoice_id
            )));
        }
        let items = tx.list_items(invoice_id).await?;
        if items.is_empty() {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "invoice {} has no line items: it cannot be emitted",
                invoice_id
            )));
        }
        if invoice.amount_ttc <= Decimal::ZERO {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "invoice {} has no billable amount: it cannot be emitted",
                invoice_id
            )));
        }

        let number = tx.next_invoice_number().await?;
        invoice.invoice_number = Some(number);
        invoice.issue_date = Some(issue_date.unwrap_or_else(|| Utc::now().date_naive()));
        invoice.status = InvoiceStatus::Emitted.as_str().to_string();
        invoice.emitted_by = Some(actor_id);
        invoice.emitted_utc = Some(Utc::now());
        invoice.balance_due = invoice.amount_ttc - invoice.amount_paid;
        tx.update_invoice(&mut invoice).await?;
        tx.commit().await?;

        timer.observe_duration();
        INVOICES_TOTAL.with_label_values(&["emitted"]).inc();
        info!(
            invoice_id = %invoice_id,
            invoice_number = %invoice.invoice_number.as_deref().unwrap_or(""),
            "Invoice emitted"
        );
        Ok(invoice)
    }

    /// Cancel an invoice. Fails while any active allocation exists, so no
    /// payment is ever left pointing at a dead invoice.
    #[instrument(skip(self, reason), fields(invoice_id = %invoice_id, actor_id = %actor_id))]
    pub async fn cancel_invoice(
        &self,
        invoice_id: Uuid,
        actor_id: Uuid,
        reason: &str,
    ) -> Result<Invoice, AppError> {
        let timer = ENGINE_OP_DURATION
            .with_label_values(&["cancel_invoice"])
            .start_timer();

        if reason.trim().is_empty() {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "a cancellation reason is required"
            )));
        }

        let mut tx = self.store.begin().await?;
        let mut invoice = tx
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        workflow::ensure_transition(invoice.current_status(), InvoiceStatus::Cancelled)?;

        let allocations = tx.list_allocations_for_invoice(invoice_id).await?;
        let active = allocations.iter().filter(|a| a.is_active()).count();
        if active > 0 {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "invoice {} has {} active allocation(s): reverse them before cancelling",
                invoice_id,
                active
            )));
        }

        invoice.status = InvoiceStatus::Cancelled.as_str().to_string();
        invoice.cancelled_by = Some(actor_id);
        invoice.cancelled_utc = Some(Utc::now());
        invoice.cancellation_reason = Some(reason.to_string());
        tx.update_invoice(&mut invoice).await?;
        tx.commit().await?;

        timer.observe_duration();
        INVOICES_TOTAL.with_label_values(&["cancelled"]).inc();
        info!(invoice_id = %invoice_id, "Invoice cancelled");
        Ok(invoice)
    }

    // -------------------------------------------------------------------------
    // Payment Operations
    // -------------------------------------------------------------------------

    /// Record a payment receipt. Touches no invoice.
    #[instrument(skip(self, input), fields(bank_account_ref = %input.bank_account_ref))]
    pub async fn record_payment(
        &self,
        input: &CreatePayment,
        actor_id: Uuid,
    ) -> Result<Payment, AppError> {
        let timer = ENGINE_OP_DURATION
            .with_label_values(&["record_payment"])
            .start_timer();

        let amount = money::round_money(input.amount);
        if amount <= Decimal::ZERO {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "payment amount must be positive, got {}",
                input.amount
            )));
        }
        let currency = input
            .currency
            .clone()
            .unwrap_or_else(|| money::DEFAULT_CURRENCY.to_string());
        validate_currency(&currency)?;

        let mut tx = self.store.begin().await?;
        let number = tx.next_payment_number().await?;
        let now = Utc::now();
        let payment = Payment {
            payment_id: Uuid::new_v4(),
            payment_number: number,
            amount,
            currency,
            payment_date: input.payment_date,
            method: input.method.as_str().to_string(),
            reference: input.reference.clone(),
            status: PaymentStatus::Valid.as_str().to_string(),
            financial_institution_ref: input.financial_institution_ref,
            bank_account_ref: input.bank_account_ref,
            notes: input.notes.clone(),
            created_by: actor_id,
            created_utc: now,
            updated_utc: now,
            cancelled_by: None,
            cancelled_utc: None,
            version: 0,
        };
        tx.insert_payment(&payment).await?;
        tx.commit().await?;

        timer.observe_duration();
        PAYMENTS_TOTAL
            .with_label_values(&[input.method.as_str()])
            .inc();
        info!(
            payment_id = %payment.payment_id,
            payment_number = %payment.payment_number,
            amount = %payment.amount,
            "Payment recorded"
        );
        Ok(payment)
    }

    /// Get a payment with its allocation history and remaining capacity.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn get_payment(&self, payment_id: Uuid) -> Result<PaymentDetail, AppError> {
        let mut tx = self.store.begin().await?;
        let payment = tx
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| payment_not_found(payment_id))?;
        let allocations = tx.list_allocations_for_payment(payment_id).await?;
        let amount_allocated = money::round_money(
            allocations
                .iter()
                .filter(|a| a.is_active())
                .map(|a| a.amount_allocated)
                .sum::<Decimal>(),
        );
        let amount_unallocated = payment.amount - amount_allocated;
        Ok(PaymentDetail {
            payment,
            allocations,
            amount_allocated,
            amount_unallocated,
        })
    }

    /// List payments with filters and keyset pagination.
    #[instrument(skip(self, filter))]
    pub async fn list_payments(
        &self,
        filter: &ListPaymentsFilter,
    ) -> Result<Vec<Payment>, AppError> {
        let mut tx = self.store.begin().await?;
        tx.list_payments(filter).await
    }

    /// Cancel a payment. Fails while any active allocation exists;
    /// cancelled payments drop out of every allocation sum.
    #[instrument(skip(self), fields(payment_id = %payment_id, actor_id = %actor_id))]
    pub async fn cancel_payment(
        &self,
        payment_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Payment, AppError> {
        let timer = ENGINE_OP_DURATION
            .with_label_values(&["cancel_payment"])
            .start_timer();

        let mut tx = self.store.begin().await?;
        let mut payment = tx
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| payment_not_found(payment_id))?;
        if payment.current_status() == PaymentStatus::Cancelled {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "payment {} is already cancelled",
                payment_id
            )));
        }

        let allocations = tx.list_allocations_for_payment(payment_id).await?;
        let active = allocations.iter().filter(|a| a.is_active()).count();
        if active > 0 {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "payment {} has {} active allocation(s): reverse them before cancelling",
                payment_id,
                active
            )));
        }

        payment.status = PaymentStatus::Cancelled.as_str().to_string();
        payment.cancelled_by = Some(actor_id);
        payment.cancelled_utc = Some(Utc::now());
        tx.update_payment(&mut payment).await?;
        tx.commit().await?;

        timer.observe_duration();
        info!(payment_id = %payment_id, "Payment cancelled");
        Ok(payment)
    }

    // -------------------------------------------------------------------------
    // Allocation Operations
    // -------------------------------------------------------------------------

    /// Allocate a payment across one or more invoices, in caller order.
    ///
    /// The whole batch is one transaction: if any entry fails its checks
    /// nothing is applied. Each applied entry recomputes the invoice's
    /// payment state and may advance its status toward `paid`; this is the
    /// only path that does so.
    #[instrument(skip(self, requests), fields(payment_id = %payment_id, count = requests.len()))]
    pub async fn allocate_payment(
        &self,
        payment_id: Uuid,
        requests: &[AllocationRequest],
        actor_id: Uuid,
    ) -> Result<Vec<PaymentAllocation>, AppError> {
        let timer = ENGINE_OP_DURATION
            .with_label_values(&["allocate_payment"])
            .start_timer();

        if requests.is_empty() {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "at least one allocation is required"
            )));
        }

        let mut tx = self.store.begin().await?;
        let payment = tx
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| payment_not_found(payment_id))?;
        if payment.current_status() == PaymentStatus::Cancelled {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "payment {} is cancelled: it cannot be allocated",
                payment_id
            )));
        }

        let existing = tx.list_allocations_for_payment(payment_id).await?;
        let mut payment_remaining = payment.amount
            - existing
                .iter()
                .filter(|a| a.is_active())
                .map(|a| a.amount_allocated)
                .sum::<Decimal>();

        let mut created = Vec::with_capacity(requests.len());
        for request in requests {
            let amount = money::round_money(request.amount);
            if amount <= Decimal::ZERO {
                return Err(AppError::ValidationError(anyhow::anyhow!(
                    "allocated amount must be positive, got {}",
                    request.amount
                )));
            }

            let mut invoice = tx
                .get_invoice(request.invoice_id)
                .await?
                .ok_or_else(|| invoice_not_found(request.invoice_id))?;
            match invoice.current_status() {
                InvoiceStatus::Emitted | InvoiceStatus::PartiallyPaid | InvoiceStatus::Paid => {}
                status => {
                    return Err(AppError::InvalidState(anyhow::anyhow!(
                        "invoice {} is '{}': allocations require an emitted invoice",
                        request.invoice_id,
                        status
                    )))
                }
            }
            if invoice.currency != payment.currency {
                return Err(AppError::ValidationError(anyhow::anyhow!(
                    "payment currency '{}' does not match invoice currency '{}'",
                    payment.currency,
                    invoice.currency
                )));
            }
            if amount > payment_remaining {
                return Err(AppError::OverAllocation(anyhow::anyhow!(
                    "allocating {} exceeds payment {} remaining capacity {}",
                    amount,
                    payment_id,
                    payment_remaining
                )));
            }
            if amount > invoice.balance_due {
                return Err(AppError::OverAllocation(anyhow::anyhow!(
                    "allocating {} exceeds invoice {} balance due {}",
                    amount,
                    request.invoice_id,
                    invoice.balance_due
                )));
            }

            let allocation = PaymentAllocation {
                allocation_id: Uuid::new_v4(),
                payment_id,
                invoice_id: request.invoice_id,
                amount_allocated: amount,
                allocation_date: payment.payment_date,
                notes: request.notes.clone(),
                created_by: actor_id,
                created_utc: Utc::now(),
                reversed_by: None,
                reversed_utc: None,
            };
            tx.insert_allocation(&allocation).await?;
            payment_remaining -= amount;

            recompute_payment_state_tx(&mut tx, &mut invoice).await?;
            tx.update_invoice(&mut invoice).await?;
            created.push(allocation);
        }
        tx.commit().await?;

        timer.observe_duration();
        ALLOCATIONS_TOTAL
            .with_label_values(&["applied"])
            .inc_by(created.len() as f64);
        info!(
            payment_id = %payment_id,
            payment_number = %payment.payment_number,
            allocations = created.len(),
            "Payment allocated"
        );
        Ok(created)
    }

    /// Reverse an allocation (soft delete, auditable) and recompute both
    /// the payment's remaining capacity and the invoice's balance. May move
    /// a `paid` invoice back to `partially_paid` or `emitted`.
    #[instrument(skip(self), fields(allocation_id = %allocation_id, actor_id = %actor_id))]
    pub async fn reverse_allocation(
        &self,
        allocation_id: Uuid,
        actor_id: Uuid,
    ) -> Result<PaymentAllocation, AppError> {
        let timer = ENGINE_OP_DURATION
            .with_label_values(&["reverse_allocation"])
            .start_timer();

        let mut tx = self.store.begin().await?;
        let allocation = tx
            .get_allocation(allocation_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("allocation {} not found", allocation_id))
            })?;

        // Lock order: payment before invoice, then re-read the allocation
        // under the locks before deciding it is still active.
        let payment = tx
            .get_payment(allocation.payment_id)
            .await?
            .ok_or_else(|| {
                AppError::InvariantViolation(anyhow::anyhow!(
                    "allocation {} references a missing payment",
                    allocation_id
                ))
            })?;
        let mut invoice = tx
            .get_invoice(allocation.invoice_id)
            .await?
            .ok_or_else(|| {
                AppError::InvariantViolation(anyhow::anyhow!(
                    "allocation {} references a missing invoice",
                    allocation_id
                ))
            })?;
        let mut allocation = tx
            .get_allocation(allocation_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("allocation {} not found", allocation_id))
            })?;
        if !allocation.is_active() {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "allocation {} is already reversed",
                allocation_id
            )));
        }

        allocation.reversed_by = Some(actor_id);
        allocation.reversed_utc = Some(Utc::now());
        tx.update_allocation(&allocation).await?;

        recompute_payment_state_tx(&mut tx, &mut invoice).await?;
        tx.update_invoice(&mut invoice).await?;
        tx.commit().await?;

        timer.observe_duration();
        ALLOCATIONS_TOTAL.with_label_values(&["reversed"]).inc();
        info!(
            allocation_id = %allocation_id,
            payment_number = %payment.payment_number,
            invoice_id = %invoice.invoice_id,
            amount = %allocation.amount_allocated,
            "Allocation reversed"
        );
        Ok(allocation)
    }
}
