//! HTTP surface smoke tests over the in-memory store.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use invoicing_service::services::{BillingEngine, MemStore};
use invoicing_service::{app_router, AppState};
use service_core::retry::RetryConfig;

fn app() -> axum::Router {
    let state = AppState {
        engine: Arc::new(BillingEngine::new(MemStore::new())),
        retry: RetryConfig::default(),
    };
    app_router(state)
}

#[tokio::test]
async fn health_and_metrics_endpoints_respond() {
    let app = app();
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn creating_an_invoice_requires_the_actor_header() {
    let app = app();
    let body = serde_json::to_vec(&common::draft_invoice_input()).unwrap();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/invoices")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn create_then_fetch_an_invoice() {
    let app = app();
    let actor_id = Uuid::new_v4();

    let body = serde_json::to_vec(&common::draft_invoice_input()).unwrap();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/invoices")
                .header("content-type", "application/json")
                .header("x-actor-id", actor_id.to_string())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let created: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(created["status"], "draft");
    assert_eq!(created["currency"], "XAF");
    let invoice_id = created["invoice_id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/invoices/{}", invoice_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let aggregate: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(aggregate["invoice"]["invoice_id"], invoice_id.as_str());
    assert!(aggregate["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_invoice_returns_404_over_http() {
    let app = app();
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/invoices/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
