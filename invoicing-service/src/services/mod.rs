//! Services module for invoicing-service.

pub mod engine;
pub mod metrics;
pub mod store;
pub mod workflow;

pub use engine::BillingEngine;
pub use metrics::{get_metrics, init_metrics};
pub use store::{MemStore, PgStore, Store, StoreTx};
