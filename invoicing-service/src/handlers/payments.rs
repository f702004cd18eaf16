//! Payment and allocation handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use service_core::error::AppError;
use service_core::retry::retry_on_conflict;

use crate::dtos::AllocatePaymentRequest;
use crate::middleware::ActorContext;
use crate::models::{
    CreatePayment, ListPaymentsFilter, Payment, PaymentAllocation, PaymentDetail,
};
use crate::services::store::Store;
use crate::startup::AppState;

pub async fn record_payment<S: Store>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Json(input): Json<CreatePayment>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    let payment = state.engine.record_payment(&input, actor.actor_id).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn get_payment<S: Store>(
    State(state): State<AppState<S>>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentDetail>, AppError> {
    Ok(Json(state.engine.get_payment(payment_id).await?))
}

pub async fn list_payments<S: Store>(
    State(state): State<AppState<S>>,
    Query(filter): Query<ListPaymentsFilter>,
) -> Result<Json<Vec<Payment>>, AppError> {
    Ok(Json(state.engine.list_payments(&filter).await?))
}

pub async fn cancel_payment<S: Store>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    let engine = &state.engine;
    let payment = retry_on_conflict(&state.retry, "cancel_payment", || {
        engine.cancel_payment(payment_id, actor.actor_id)
    })
    .await?;
    Ok(Json(payment))
}

pub async fn allocate_payment<S: Store>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<AllocatePaymentRequest>,
) -> Result<(StatusCode, Json<Vec<PaymentAllocation>>), AppError> {
    let engine = &state.engine;
    let allocations = retry_on_conflict(&state.retry, "allocate_payment", || {
        engine.allocate_payment(payment_id, &payload.allocations, actor.actor_id)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(allocations)))
}

pub async fn reverse_allocation<S: Store>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path(allocation_id): Path<Uuid>,
) -> Result<Json<PaymentAllocation>, AppError> {
    let engine = &state.engine;
    let allocation = retry_on_conflict(&state.retry, "reverse_allocation", || {
        engine.reverse_allocation(allocation_id, actor.actor_id)
    })
    .await?;
    Ok(Json(allocation))
}
