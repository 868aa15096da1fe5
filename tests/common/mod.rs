//! Test application setup utilities
//!
//! Builds the full router with the middleware pipeline in its
//! contractual order against an in-memory SQLite database, plus
//! seeding helpers and a small response wrapper.

#![allow(dead_code)]

use axum::{body::Body, http::Request, Router};
use tower::ServiceExt;
use uuid::Uuid;

use relaydesk::{
    api,
    config::{AppConfig, DatabaseConfig, RateLimitSettings},
    db, middleware,
    services::AuthService,
    AppState,
};

pub const TEST_SECRET: &str = "test-secret-that-is-at-least-32-characters-long";

/// Test application wrapper for integration testing
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    /// Create a test application with generous rate budgets
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Create a test application with custom configuration
    pub async fn with_config(config: AppConfig) -> Self {
        let db = db::init_pool(&config.database)
            .await
            .expect("Failed to initialize test database");

        let state = AppState::new(config, db);

        let protected = api::protected_routes(&state)
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                middleware::suspension_middleware,
            ))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                middleware::tenant_middleware,
            ))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                middleware::auth_middleware,
            ));

        let router = Router::new()
            .nest("/api/v1", api::public_routes(&state).merge(protected))
            .with_state(state.clone());

        Self { router, state }
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.request(build_request("GET", uri, None, token)).await
    }

    pub async fn post_json(
        &self,
        uri: &str,
        body: serde_json::Value,
        token: Option<&str>,
    ) -> TestResponse {
        self.request(build_request("POST", uri, Some(body), token))
            .await
    }

    pub async fn put_json(
        &self,
        uri: &str,
        body: serde_json::Value,
        token: Option<&str>,
    ) -> TestResponse {
        self.request(build_request("PUT", uri, Some(body), token))
            .await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.request(build_request("DELETE", uri, None, token)).await
    }

    pub async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");

        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Seed a company, returning its id
    pub async fn seed_company(&self, name: &str, tier: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO companies (id, name, tier) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(name)
            .bind(tier)
            .execute(&self.state.db)
            .await
            .expect("Failed to seed company");
        id
    }

    /// Set the company's session timeout policy
    pub async fn set_company_timeout(&self, company_id: Uuid, minutes: i64, enforced: bool) {
        sqlx::query(
            "UPDATE companies SET session_timeout_minutes = ?, session_timeout_enforced = ? WHERE id = ?",
        )
        .bind(minutes)
        .bind(enforced as i64)
        .bind(company_id.to_string())
        .execute(&self.state.db)
        .await
        .expect("Failed to set company timeout");
    }

    /// Seed a user with a hashed password, returning their id
    pub async fn seed_user(&self, email: &str, password: &str) -> Uuid {
        let id = Uuid::new_v4();
        let hash = AuthService::hash_password(password).expect("Failed to hash password");
        sqlx::query("INSERT INTO users (id, email, password_hash) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(email)
            .bind(hash)
            .execute(&self.state.db)
            .await
            .expect("Failed to seed user");
        id
    }

    pub async fn set_user_timeout(&self, user_id: Uuid, minutes: i64) {
        sqlx::query("UPDATE users SET session_timeout_minutes = ? WHERE id = ?")
            .bind(minutes)
            .bind(user_id.to_string())
            .execute(&self.state.db)
            .await
            .expect("Failed to set user timeout");
    }

    pub async fn suspend_user(&self, user_id: Uuid) {
        sqlx::query("UPDATE users SET suspended = 1 WHERE id = ?")
            .bind(user_id.to_string())
            .execute(&self.state.db)
            .await
            .expect("Failed to suspend user");
    }

    pub async fn seed_membership(&self, user_id: Uuid, company_id: Uuid, role: &str) {
        sqlx::query("INSERT INTO memberships (user_id, company_id, role) VALUES (?, ?, ?)")
            .bind(user_id.to_string())
            .bind(company_id.to_string())
            .bind(role)
            .execute(&self.state.db)
            .await
            .expect("Failed to seed membership");
    }

    pub async fn seed_project(&self, company_id: Uuid, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO projects (id, company_id, name) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(company_id.to_string())
            .bind(name)
            .execute(&self.state.db)
            .await
            .expect("Failed to seed project");
        id
    }

    pub async fn seed_project_role(&self, user_id: Uuid, project_id: Uuid, role: &str) {
        sqlx::query("INSERT INTO project_roles (user_id, project_id, role) VALUES (?, ?, ?)")
            .bind(user_id.to_string())
            .bind(project_id.to_string())
            .bind(role)
            .execute(&self.state.db)
            .await
            .expect("Failed to seed project role");
    }

    pub async fn seed_agent(&self, project_id: Uuid, name: &str, status: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO agents (id, project_id, name, status) VALUES (?, ?, ?, ?)")
            .bind(id.to_string())
            .bind(project_id.to_string())
            .bind(name)
            .bind(status)
            .execute(&self.state.db)
            .await
            .expect("Failed to seed agent");
        id
    }

    /// Generate a valid access token for a seeded user
    pub fn access_token(&self, user_id: Uuid, email: &str) -> String {
        let (token, _) = middleware::auth::create_access_token(
            user_id,
            email,
            &self.state.config.auth.jwt_secret,
            1,
        )
        .expect("Failed to create test token");
        token
    }

    /// Generate an agent credential for a seeded agent
    pub fn agent_token(&self, agent_id: Uuid, project_id: Uuid) -> String {
        let (token, _) = middleware::auth::create_agent_token(
            agent_id,
            project_id,
            &self.state.config.auth.jwt_secret,
            30,
        )
        .expect("Failed to create agent token");
        token
    }
}

fn build_request(
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
    token: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: axum::http::StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: bytes::Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("Failed to parse response as JSON")
    }

    /// The `code` field of the uniform error envelope
    pub fn error_code(&self) -> String {
        let json: serde_json::Value = self.json();
        json["error"]["code"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }

    pub fn assert_status(&self, expected: axum::http::StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {}, got {}. Body: {}",
            expected,
            self.status,
            self.text()
        );
        self
    }

    pub fn assert_ok(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::OK)
    }

    pub fn assert_unauthorized(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::UNAUTHORIZED)
    }

    pub fn assert_forbidden(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::FORBIDDEN)
    }
}

/// Test configuration with an in-memory database and generous budgets
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.auth.jwt_secret = TEST_SECRET.to_string();
    config.database = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        connect_timeout_secs: 5,
    };
    config
}

/// Test configuration with tiny budgets for rate limit tests
pub fn rate_limited_config(budget: u32, strict_budget: u32) -> AppConfig {
    let mut config = test_config();
    config.rate_limit = RateLimitSettings {
        free: budget,
        starter: budget,
        professional: budget,
        enterprise: budget,
        strict_budget,
        ..RateLimitSettings::default()
    };
    config
}
