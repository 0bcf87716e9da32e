//! HTTP API server for canopy.
//!
//! This crate provides:
//! - The settlement engine for batched upload transactions
//! - The mutation service for synchronous file and folder changes
//! - The axum router exposing both under `/v1`
//! - Prometheus metrics

pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod services;
pub mod state;

pub use auth::{AuthenticatedUser, TraceId};
pub use error::ApiError;
pub use routes::create_router;
pub use services::{MutationService, ServiceError, SettlementEngine};
pub use state::AppState;
