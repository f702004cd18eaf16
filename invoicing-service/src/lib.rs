pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod money;
pub mod services;
pub mod startup;

pub use startup::{app_router, AppState, Application};
