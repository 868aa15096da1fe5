//! Relaydesk control plane library
//!
//! Request authorization and session-lifecycle core for the Relaydesk
//! multi-tenant platform: the middleware pipeline that turns a bearer
//! credential into an authenticated principal with a tenant and an
//! effective permission set, the per-tenant rate limiter, and the
//! client-side session manager that keeps a credential alive.

use std::sync::Arc;

pub mod api;
pub mod client;
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use db::DbPool;
pub use middleware::{auth_middleware, Principal, RequestPrincipal};

use middleware::RateLimitState;
use services::{Directory, SqliteDirectory};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Database connection pool
    pub db: DbPool,
    /// Authorization directory (membership, suspension, role lookups)
    pub directory: Arc<dyn Directory>,
    /// Tier-scaled limiter for general API traffic
    pub rate_limit: RateLimitState,
    /// Endpoint-scoped limiter for credential issuance
    pub strict_rate_limit: RateLimitState,
}

impl AppState {
    /// Build the state with the SQLite-backed directory and in-memory
    /// rate limiters.
    pub fn new(config: AppConfig, db: DbPool) -> Self {
        let rate_limit = RateLimitState::standard(config.rate_limit.clone());
        let strict_rate_limit = RateLimitState::strict(config.rate_limit.clone());
        let directory: Arc<dyn Directory> = Arc::new(SqliteDirectory::new(db.clone()));

        Self {
            config,
            db,
            directory,
            rate_limit,
            strict_rate_limit,
        }
    }
}
