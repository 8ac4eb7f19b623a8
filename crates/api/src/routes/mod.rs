//! API routes

pub mod billing;
pub mod health;
pub mod webhooks;


use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/checkout", post(billing::create_checkout))
        .route("/api/subscription/downgrade", post(billing::downgrade))
        .route("/api/subscription/refresh", post(billing::refresh))
        .route("/api/webhooks/stripe", post(webhooks::stripe_webhook))
        .with_state(state)
}

/// Treat absent and blank request fields the same
pub(crate) fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
