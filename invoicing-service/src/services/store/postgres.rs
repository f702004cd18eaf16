//! Postgres-backed store.
//!
//! Queries are runtime-checked `query_as` calls against the schema owned by
//! this crate (`migrations/`). Invoice and Payment reads inside a
//! transaction take `FOR UPDATE` row locks; updates additionally check the
//! `version` stamp so a stale write surfaces as `ConcurrentModification`
//! instead of silently overwriting a concurrently updated balance.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument};
use uuid::Uuid;

use service_core::error::AppError;

use crate::models::{
    Invoice, InvoiceItem, InvoiceStats, ListInvoicesFilter, ListPaymentsFilter, Payment,
    PaymentAllocation,
};

use super::{Store, StoreTx};

const INVOICE_COLUMNS: &str = "invoice_id, invoice_number, mission_ref, client_ref, currency, \
    status, issue_date, due_date, payment_terms, vat_rate, billing_address, notes, \
    amount_ht, amount_vat, amount_ttc, amount_paid, balance_due, \
    first_payment_date, last_payment_date, payment_count, \
    validated_by, validated_utc, emission_validated_by, emission_validated_utc, \
    emitted_by, emitted_utc, cancelled_by, cancelled_utc, cancellation_reason, \
    created_by, created_utc, updated_utc, version";

const ITEM_COLUMNS: &str = "item_id, invoice_id, description, quantity, unit, unit_price, \
    vat_rate, amount_ht, amount_vat, amount_ttc, sort_order, created_utc";

const PAYMENT_COLUMNS: &str = "payment_id, payment_number, amount, currency, payment_date, \
    method, reference, status, financial_institution_ref, bank_account_ref, notes, \
    created_by, created_utc, updated_utc, cancelled_by, cancelled_utc, version";

const ALLOCATION_COLUMNS: &str = "allocation_id, payment_id, invoice_id, amount_allocated, \
    allocation_date, notes, created_by, created_utc, reversed_by, reversed_utc";

/// Connection pool wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "invoicing-service"))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, AppError> {
        let tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;
        Ok(PgTx { tx })
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }
}

/// One Postgres transaction.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO invoices ({INVOICE_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
              $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33)"
        );
        sqlx::query(&sql)
            .bind(invoice.invoice_id)
            .bind(&invoice.invoice_number)
            .bind(invoice.mission_ref)
            .bind(invoice.client_ref)
            .bind(&invoice.currency)
            .bind(&invoice.status)
            .bind(invoice.issue_date)
            .bind(invoice.due_date)
            .bind(&invoice.payment_terms)
            .bind(invoice.vat_rate)
            .bind(&invoice.billing_address)
            .bind(&invoice.notes)
            .bind(invoice.amount_ht)
            .bind(invoice.amount_vat)
            .bind(invoice.amount_ttc)
            .bind(invoice.amount_paid)
            .bind(invoice.balance_due)
            .bind(invoice.first_payment_date)
            .bind(invoice.last_payment_date)
            .bind(invoice.payment_count)
            .bind(invoice.validated_by)
            .bind(invoice.validated_utc)
            .bind(invoice.emission_validated_by)
            .bind(invoice.emission_validated_utc)
            .bind(invoice.emitted_by)
            .bind(invoice.emitted_utc)
            .bind(invoice.cancelled_by)
            .bind(invoice.cancelled_utc)
            .bind(&invoice.cancellation_reason)
            .bind(invoice.created_by)
            .bind(invoice.created_utc)
            .bind(invoice.updated_utc)
            .bind(invoice.version)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert invoice: {}", e))
            })?;
        Ok(())
    }

    async fn get_invoice(&mut self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1 FOR UPDATE");
        sqlx::query_as::<_, Invoice>(&sql)
            .bind(invoice_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))
    }

    async fn update_invoice(&mut self, invoice: &mut Invoice) -> Result<(), AppError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET invoice_number = $3,
                status = $4,
                issue_date = $5,
                due_date = $6,
                payment_terms = $7,
                vat_rate = $8,
                billing_address = $9,
                notes = $10,
                amount_ht = $11,
                amount_vat = $12,
                amount_ttc = $13,
                amount_paid = $14,
                balance_due = $15,
                first_payment_date = $16,
                last_payment_date = $17,
                payment_count = $18,
                validated_by = $19,
                validated_utc = $20,
                emission_validated_by = $21,
                emission_validated_utc = $22,
                emitted_by = $23,
                emitted_utc = $24,
                cancelled_by = $25,
                cancelled_utc = $26,
                cancellation_reason = $27,
                updated_utc = $28,
                version = version + 1
            WHERE invoice_id = $1 AND version = $2
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(invoice.version)
        .bind(&invoice.invoice_number)
        .bind(&invoice.status)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(&invoice.payment_terms)
        .bind(invoice.vat_rate)
        .bind(&invoice.billing_address)
        .bind(&invoice.notes)
        .bind(invoice.amount_ht)
        .bind(invoice.amount_vat)
        .bind(invoice.amount_ttc)
        .bind(invoice.amount_paid)
        .bind(invoice.balance_due)
        .bind(invoice.first_payment_date)
        .bind(invoice.last_payment_date)
        .bind(invoice.payment_count)
        .bind(invoice.validated_by)
        .bind(invoice.validated_utc)
        .bind(invoice.emission_validated_by)
        .bind(invoice.emission_validated_utc)
        .bind(invoice.emitted_by)
        .bind(invoice.emitted_utc)
        .bind(invoice.cancelled_by)
        .bind(invoice.cancelled_utc)
        .bind(&invoice.cancellation_reason)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::ConcurrentModification(anyhow::anyhow!(
                "invoice {} was modified by a concurrent transaction",
                invoice.invoice_id
            )));
        }
        invoice.version += 1;
        invoice.updated_utc = now;
        Ok(())
    }

    async fn delete_invoice(&mut self, invoice_id: Uuid) -> Result<bool, AppError> {
        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice items: {}", e))
            })?;
        let result = sqlx::query("DELETE FROM invoices WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice: {}", e))
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_invoices(
        &mut self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let limit = filter.page_size.clamp(1, 100) as i64;
        let status_str = filter.status.map(|s| s.as_str().to_string());
        let sql = format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE ($1::varchar IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR client_ref = $2)
              AND ($3::uuid IS NULL OR mission_ref = $3)
              AND ($4::date IS NULL OR issue_date >= $4)
              AND ($5::date IS NULL OR issue_date <= $5)
              AND ($6::uuid IS NULL OR invoice_id > $6)
            ORDER BY invoice_id
            LIMIT $7
            "#
        );
        sqlx::query_as::<_, Invoice>(&sql)
            .bind(&status_str)
            .bind(filter.client_ref)
            .bind(filter.mission_ref)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(filter.page_token)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))
    }

    async fn invoice_stats(&mut self) -> Result<InvoiceStats, AppError> {
        let counts: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM invoices GROUP BY status")
                .fetch_all(&mut *self.tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to count invoices: {}", e))
                })?;

        let outstanding: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(balance_due), 0) FROM invoices \
             WHERE status IN ('emitted', 'partially_paid')",
        )
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum outstanding balance: {}", e))
        })?;

        let mut stats = InvoiceStats {
            draft: 0,
            emitted: 0,
            partially_paid: 0,
            paid: 0,
            cancelled: 0,
            total_outstanding: outstanding.unwrap_or(Decimal::ZERO),
        };
        for (status, count) in counts {
            match status.as_str() {
                "draft" => stats.draft = count,
                "emitted" => stats.emitted = count,
                "partially_paid" => stats.partially_paid = count,
                "paid" => stats.paid = count,
                "cancelled" => stats.cancelled = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn next_invoice_number(&mut self) -> Result<String, AppError> {
        let seq: i64 = sqlx::query_scalar("SELECT nextval('invoice_number_seq')")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to advance invoice number sequence: {}",
                    e
                ))
            })?;
        Ok(format!("FACT-{}-{:04}", Utc::now().format("%Y%m"), seq))
    }

    async fn insert_item(&mut self, item: &InvoiceItem) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO invoice_items ({ITEM_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        );
        sqlx::query(&sql)
            .bind(item.item_id)
            .bind(item.invoice_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(&item.unit)
            .bind(item.unit_price)
            .bind(item.vat_rate)
            .bind(item.amount_ht)
            .bind(item.amount_vat)
            .bind(item.amount_ttc)
            .bind(item.sort_order)
            .bind(item.created_utc)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert line item: {}", e))
            })?;
        Ok(())
    }

    async fn get_item(&mut self, item_id: Uuid) -> Result<Option<InvoiceItem>, AppError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM invoice_items WHERE item_id = $1");
        sqlx::query_as::<_, InvoiceItem>(&sql)
            .bind(item_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get line item: {}", e)))
    }

    async fn update_item(&mut self, item: &InvoiceItem) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE invoice_items
            SET description = $2,
                quantity = $3,
                unit = $4,
                unit_price = $5,
                vat_rate = $6,
                amount_ht = $7,
                amount_vat = $8,
                amount_ttc = $9,
                sort_order = $10
            WHERE item_id = $1
            "#,
        )
        .bind(item.item_id)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(&item.unit)
        .bind(item.unit_price)
        .bind(item.vat_rate)
        .bind(item.amount_ht)
        .bind(item.amount_vat)
        .bind(item.amount_ttc)
        .bind(item.sort_order)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update line item: {}", e))
        })?;
        Ok(())
    }

    async fn delete_item(&mut self, invoice_id: Uuid, item_id: Uuid) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1 AND item_id = $2")
                .bind(invoice_id)
                .bind(item_id)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to remove line item: {}", e))
                })?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_items(&mut self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM invoice_items WHERE invoice_id = $1 \
             ORDER BY sort_order, created_utc"
        );
        sqlx::query_as::<_, InvoiceItem>(&sql)
            .bind(invoice_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list line items: {}", e))
            })
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        );
        sqlx::query(&sql)
            .bind(payment.payment_id)
            .bind(&payment.payment_number)
            .bind(payment.amount)
            .bind(&payment.currency)
            .bind(payment.payment_date)
            .bind(&payment.method)
            .bind(&payment.reference)
            .bind(&payment.status)
            .bind(payment.financial_institution_ref)
            .bind(payment.bank_account_ref)
            .bind(&payment.notes)
            .bind(payment.created_by)
            .bind(payment.created_utc)
            .bind(payment.updated_utc)
            .bind(payment.cancelled_by)
            .bind(payment.cancelled_utc)
            .bind(payment.version)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert payment: {}", e))
            })?;
        Ok(())
    }

    async fn get_payment(&mut self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = $1 FOR UPDATE");
        sqlx::query_as::<_, Payment>(&sql)
            .bind(payment_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))
    }

    async fn update_payment(&mut self, payment: &mut Payment) -> Result<(), AppError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $3,
                cancelled_by = $4,
                cancelled_utc = $5,
                notes = $6,
                updated_utc = $7,
                version = version + 1
            WHERE payment_id = $1 AND version = $2
            "#,
        )
        .bind(payment.payment_id)
        .bind(payment.version)
        .bind(&payment.status)
        .bind(payment.cancelled_by)
        .bind(payment.cancelled_utc)
        .bind(&payment.notes)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update payment: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::ConcurrentModification(anyhow::anyhow!(
                "payment {} was modified by a concurrent transaction",
                payment.payment_id
            )));
        }
        payment.version += 1;
        payment.updated_utc = now;
        Ok(())
    }

    async fn list_payments(
        &mut self,
        filter: &ListPaymentsFilter,
    ) -> Result<Vec<Payment>, AppError> {
        let limit = filter.page_size.clamp(1, 100) as i64;
        let method_str = filter.method.map(|m| m.as_str().to_string());
        let sql = format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE ($1::varchar IS NULL OR method = $1)
              AND ($2::uuid IS NULL OR bank_account_ref = $2)
              AND ($3::date IS NULL OR payment_date >= $3)
              AND ($4::date IS NULL OR payment_date <= $4)
              AND ($5::uuid IS NULL OR payment_id > $5)
            ORDER BY payment_id
            LIMIT $6
            "#
        );
        sqlx::query_as::<_, Payment>(&sql)
            .bind(&method_str)
            .bind(filter.bank_account_ref)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(filter.page_token)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))
    }

    async fn next_payment_number(&mut self) -> Result<String, AppError> {
        let seq: i64 = sqlx::query_scalar("SELECT nextval('payment_number_seq')")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to advance payment number sequence: {}",
                    e
                ))
            })?;
        Ok(format!("PAY-{}-{:04}", Utc::now().format("%Y%m"), seq))
    }

    async fn insert_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO payment_allocations ({ALLOCATION_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        );
        sqlx::query(&sql)
            .bind(allocation.allocation_id)
            .bind(allocation.payment_id)
            .bind(allocation.invoice_id)
            .bind(allocation.amount_allocated)
            .bind(allocation.allocation_date)
            .bind(&allocation.notes)
            .bind(allocation.created_by)
            .bind(allocation.created_utc)
            .bind(allocation.reversed_by)
            .bind(allocation.reversed_utc)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert allocation: {}", e))
            })?;
        Ok(())
    }

    async fn get_allocation(
        &mut self,
        allocation_id: Uuid,
    ) -> Result<Option<PaymentAllocation>, AppError> {
        let sql =
            format!("SELECT {ALLOCATION_COLUMNS} FROM payment_allocations WHERE allocation_id = $1");
        sqlx::query_as::<_, PaymentAllocation>(&sql)
            .bind(allocation_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to get allocation: {}", e))
            })
    }

    async fn update_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE payment_allocations
            SET notes = $2,
                reversed_by = $3,
                reversed_utc = $4
            WHERE allocation_id = $1
            "#,
        )
        .bind(allocation.allocation_id)
        .bind(&allocation.notes)
        .bind(allocation.reversed_by)
        .bind(allocation.reversed_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update allocation: {}", e))
        })?;
        Ok(())
    }

    async fn list_allocations_for_invoice(
        &mut self,
        invoice_id: Uuid,
    ) -> Result<Vec<PaymentAllocation>, AppError> {
        let sql = format!(
            "SELECT {ALLOCATION_COLUMNS} FROM payment_allocations WHERE invoice_id = $1 \
             ORDER BY created_utc, allocation_id"
        );
        sqlx::query_as::<_, PaymentAllocation>(&sql)
            .bind(invoice_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list allocations: {}", e))
            })
    }

    async fn list_allocations_for_payment(
        &mut self,
        payment_id: Uuid,
    ) -> Result<Vec<PaymentAllocation>, AppError> {
        let sql = format!(
            "SELECT {ALLOCATION_COLUMNS} FROM payment_allocations WHERE payment_id = $1 \
             ORDER BY created_utc, allocation_id"
        );
        sqlx::query_as::<_, PaymentAllocation>(&sql)
            .bind(payment_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list allocations: {}", e))
            })
    }

    async fn commit(self) -> Result<(), AppError> {
        self.tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })
    }
}
