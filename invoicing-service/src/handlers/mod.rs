//! HTTP surface of the billing engine.
//!
//! Thin axum handlers: extract the actor, call the engine, serialize the
//! result. Mutating operations are wrapped in the bounded
//! concurrent-modification retry.

mod invoices;
mod payments;

use axum::routing::{get, patch, post, put};
use axum::Router;

use crate::services::store::Store;
use crate::startup::AppState;

pub fn api_router<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route(
            "/invoices",
            post(invoices::create_invoice::<S>).get(invoices::list_invoices::<S>),
        )
        .route("/invoices/stats", get(invoices::invoice_stats::<S>))
        .route(
            "/invoices/:id",
            get(invoices::get_invoice::<S>)
                .put(invoices::update_invoice::<S>)
                .delete(invoices::delete_invoice::<S>),
        )
        .route(
            "/invoices/:id/items",
            post(invoices::add_item::<S>).get(invoices::list_items::<S>),
        )
        .route(
            "/invoices/:id/items/:item_id",
            put(invoices::update_item::<S>).delete(invoices::remove_item::<S>),
        )
        .route("/invoices/:id/validate", patch(invoices::mark_validated::<S>))
        .route(
            "/invoices/:id/validate-emission",
            patch(invoices::validate_for_emission::<S>),
        )
        .route("/invoices/:id/emit", patch(invoices::emit_invoice::<S>))
        .route("/invoices/:id/cancel", patch(invoices::cancel_invoice::<S>))
        .route("/invoices/:id/due-date", put(invoices::set_due_date::<S>))
        .route(
            "/payments",
            post(payments::record_payment::<S>).get(payments::list_payments::<S>),
        )
        .route("/payments/:id", get(payments::get_payment::<S>))
        .route("/payments/:id/cancel", patch(payments::cancel_payment::<S>))
        .route(
            "/payments/:id/allocations",
            post(payments::allocate_payment::<S>),
        )
        .route(
            "/allocations/:id/reverse",
            patch(payments::reverse_allocation::<S>),
        )
}
