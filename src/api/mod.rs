//! API routes and handlers

use axum::{routing::get, Router};

use crate::AppState;

mod agents;
mod auth;
mod health;
mod projects;

/// Public API routes (no authentication required)
pub fn public_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/auth", auth::public_routes(state))
}

/// Protected API routes (full middleware pipeline applied in main)
pub fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::protected_routes(state))
        .nest("/projects", projects::routes(state))
        .nest("/agents", agents::routes(state))
}
