//! Invoice, line item and workflow handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use service_core::error::AppError;
use service_core::retry::retry_on_conflict;

use crate::dtos::{CancelInvoiceRequest, DueDateRequest, EmitInvoiceRequest};
use crate::middleware::ActorContext;
use crate::models::{
    CreateInvoice, CreateInvoiceItem, Invoice, InvoiceAggregate, InvoiceItem, InvoiceStats,
    ListInvoicesFilter, UpdateInvoice, UpdateInvoiceItem,
};
use crate::services::store::Store;
use crate::startup::AppState;

pub async fn create_invoice<S: Store>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Json(input): Json<CreateInvoice>,
) -> Result<(StatusCode, Json<Invoice>), AppError> {
    let invoice = state.engine.create_invoice(&input, actor.actor_id).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn get_invoice<S: Store>(
    State(state): State<AppState<S>>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceAggregate>, AppError> {
    Ok(Json(state.engine.get_invoice(invoice_id).await?))
}

pub async fn list_invoices<S: Store>(
    State(state): State<AppState<S>>,
    Query(filter): Query<ListInvoicesFilter>,
) -> Result<Json<Vec<Invoice>>, AppError> {
    Ok(Json(state.engine.list_invoices(&filter).await?))
}

pub async fn invoice_stats<S: Store>(
    State(state): State<AppState<S>>,
) -> Result<Json<InvoiceStats>, AppError> {
    Ok(Json(state.engine.invoice_stats().await?))
}

pub async fn update_invoice<S: Store>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path(invoice_id): Path<Uuid>,
    Json(input): Json<UpdateInvoice>,
) -> Result<Json<Invoice>, AppError> {
    let engine = &state.engine;
    let invoice = retry_on_conflict(&state.retry, "update_invoice", || {
        engine.update_invoice(invoice_id, &input, actor.actor_id)
    })
    .await?;
    Ok(Json(invoice))
}

pub async fn delete_invoice<S: Store>(
    State(state): State<AppState<S>>,
    _actor: ActorContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let engine = &state.engine;
    retry_on_conflict(&state.retry, "delete_invoice", || {
        engine.delete_invoice(invoice_id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_item<S: Store>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path(invoice_id): Path<Uuid>,
    Json(input): Json<CreateInvoiceItem>,
) -> Result<(StatusCode, Json<InvoiceItem>), AppError> {
    let engine = &state.engine;
    let item = retry_on_conflict(&state.retry, "add_item", || {
        engine.add_item(invoice_id, &input, actor.actor_id)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn list_items<S: Store>(
    State(state): State<AppState<S>>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Vec<InvoiceItem>>, AppError> {
    Ok(Json(state.engine.list_items(invoice_id).await?))
}

pub async fn update_item<S: Store>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path((invoice_id, item_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<UpdateInvoiceItem>,
) -> Result<Json<InvoiceItem>, AppError> {
    let engine = &state.engine;
    let item = retry_on_conflict(&state.retry, "update_item", || {
        engine.update_item(invoice_id, item_id, &input, actor.actor_id)
    })
    .await?;
    Ok(Json(item))
}

pub async fn remove_item<S: Store>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path((invoice_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    let engine = &state.engine;
    retry_on_conflict(&state.retry, "remove_item", || {
        engine.remove_item(invoice_id, item_id, actor.actor_id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_validated<S: Store>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Invoice>, AppError> {
    let engine = &state.engine;
    let invoice = retry_on_conflict(&state.retry, "mark_validated", || {
        engine.mark_validated(invoice_id, actor.actor_id)
    })
    .await?;
    Ok(Json(invoice))
}

pub async fn validate_for_emission<S: Store>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Invoice>, AppError> {
    let engine = &state.engine;
    let invoice = retry_on_conflict(&state.retry, "validate_for_emission", || {
        engine.validate_for_emission(invoice_id, actor.actor_id)
    })
    .await?;
    Ok(Json(invoice))
}

pub async fn emit_invoice<S: Store>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<EmitInvoiceRequest>,
) -> Result<Json<Invoice>, AppError> {
    let engine = &state.engine;
    let invoice = retry_on_conflict(&state.retry, "emit_invoice", || {
        engine.emit_invoice(invoice_id, actor.actor_id, payload.issue_date)
    })
    .await?;
    Ok(Json(invoice))
}

pub async fn cancel_invoice<S: Store>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<CancelInvoiceRequest>,
) -> Result<Json<Invoice>, AppError> {
    let engine = &state.engine;
    let invoice = retry_on_conflict(&state.retry, "cancel_invoice", || {
        engine.cancel_invoice(invoice_id, actor.actor_id, &payload.reason)
    })
    .await?;
    Ok(Json(invoice))
}

pub async fn set_due_date<S: Store>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<DueDateRequest>,
) -> Result<Json<Invoice>, AppError> {
    let engine = &state.engine;
    let invoice = retry_on_conflict(&state.retry, "set_due_date", || {
        engine.set_due_date(invoice_id, payload.due_date, actor.actor_id)
    })
    .await?;
    Ok(Json(invoice))
}
