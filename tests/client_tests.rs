//! Session lifecycle and authenticated transport tests
//!
//! Runs the client-side session manager against a mock control plane:
//! single-flight renewal, refresh-failure expiry, the one-retry rule
//! after a 401, and the offline-first policy fallback chain.

use chrono::{Duration, Utc};
use futures::future::join_all;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relaydesk::client::{
    AuthenticatedClient, ClientError, Credential, SessionManager, SessionOptions, SessionState,
};

fn token_body(access: &str, refresh: &str, expires_in_secs: i64) -> serde_json::Value {
    let expires_at = Utc::now() + Duration::seconds(expires_in_secs);
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "Bearer",
        "expires_in": expires_in_secs,
        "expires_at": expires_at,
    })
}

fn credential(access: &str, expires_in_secs: i64) -> Credential {
    Credential {
        access_token: access.to_string(),
        refresh_token: "valid-refresh".to_string(),
        expires_at: Utc::now() + Duration::seconds(expires_in_secs),
    }
}

/// Inside the default 5-minute renewal lead, so the armed timer
/// refreshes immediately on install
fn near_expiry_credential() -> Credential {
    credential("stale-access", 60)
}

/// Expires in an hour, so no timer fires during a test
fn fresh_credential() -> Credential {
    credential("fresh-access", 3600)
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_renewal_call() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("renewed", "next-refresh", 3600)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let manager = SessionManager::new(SessionOptions::new(server.uri()));
    manager.install(near_expiry_credential()).await;

    let results = join_all(vec![manager.refresh(), manager.refresh()]).await;

    let credentials: Vec<Credential> = results
        .into_iter()
        .map(|r| r.expect("refresh should succeed"))
        .collect();
    assert_eq!(credentials[0].access_token, "renewed");
    assert_eq!(credentials[1].access_token, "renewed");
    assert_eq!(manager.state(), SessionState::Monitoring);

    manager.sign_out().await;
    // expect(1) is verified when the server drops.
}

#[tokio::test]
async fn test_refresh_failure_expires_the_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Invalid refresh token", "code": "UNAUTHORIZED", "statusCode": 401}
        })))
        .mount(&server)
        .await;

    let manager = SessionManager::new(SessionOptions::new(server.uri()));
    let mut states = manager.subscribe();

    // The credential is already inside the renewal lead, so the armed
    // timer refreshes immediately and fails.
    manager.install(near_expiry_credential()).await;

    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        states.wait_for(|s| *s == SessionState::Expired),
    )
    .await
    .expect("session should expire")
    .expect("state channel closed");

    assert!(manager.credential().await.is_none());
    assert!(manager.ensure_active().await.is_err());
}

#[tokio::test]
async fn test_transport_retries_exactly_once_after_401() {
    let server = MockServer::start().await;

    // The stale token is rejected; the renewed one is accepted.
    Mock::given(method("GET"))
        .and(path("/api/v1/projects"))
        .and(header("Authorization", "Bearer stale-access"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/projects"))
        .and(header("Authorization", "Bearer renewed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("renewed", "next-refresh", 3600)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let manager = SessionManager::new(SessionOptions::new(server.uri()));
    manager.install(credential("stale-access", 3600)).await;

    let client = AuthenticatedClient::new(server.uri(), manager.clone());
    let response = client.get("/api/v1/projects").await.unwrap();
    assert_eq!(response.status(), 200);

    manager.sign_out().await;
}

#[tokio::test]
async fn test_second_401_gives_up_and_expires() {
    let server = MockServer::start().await;

    // Renewal succeeds but the API keeps rejecting: the credential is
    // permanently invalid and only one retry may happen.
    Mock::given(method("GET"))
        .and(path("/api/v1/projects"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("renewed", "next-refresh", 3600)),
        )
        .mount(&server)
        .await;

    let manager = SessionManager::new(SessionOptions::new(server.uri()));
    manager.install(fresh_credential()).await;

    let client = AuthenticatedClient::new(server.uri(), manager.clone());
    let result = client.get("/api/v1/projects").await;

    assert!(matches!(result, Err(ClientError::Unauthorized)));
    assert_eq!(manager.state(), SessionState::Expired);
}

#[tokio::test]
async fn test_idle_timeout_cancels_dispatch_before_sending() {
    let server = MockServer::start().await;

    // Nothing may reach the wire once the inactivity budget is spent.
    Mock::given(method("GET"))
        .and(path("/api/v1/projects"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let manager = SessionManager::new(SessionOptions::new(server.uri()));
    manager.install(fresh_credential()).await;

    // Simulate the periodic check firing past the 30-minute default.
    let expired = manager
        .check_inactivity_at(Utc::now() + Duration::minutes(31))
        .await;
    assert!(expired);
    assert_eq!(manager.state(), SessionState::Expired);

    let client = AuthenticatedClient::new(server.uri(), manager.clone());
    let result = client.get("/api/v1/projects").await;
    assert!(matches!(result, Err(ClientError::SessionExpired)));
}

#[tokio::test]
async fn test_inactivity_boundary_is_not_premature() {
    let manager = SessionManager::new(SessionOptions::new("http://localhost:0"));
    manager.install(fresh_credential()).await;

    let still_active = manager
        .check_inactivity_at(Utc::now() + Duration::minutes(29))
        .await;
    assert!(!still_active);
    assert_eq!(manager.state(), SessionState::Monitoring);

    manager.sign_out().await;
}

#[tokio::test]
async fn test_rate_limited_response_surfaces_retry_timing() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/projects"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "7")
                .set_body_json(json!({
                    "error": {"message": "Rate limit exceeded", "code": "RATE_LIMIT_EXCEEDED", "statusCode": 429}
                })),
        )
        .mount(&server)
        .await;

    let manager = SessionManager::new(SessionOptions::new(server.uri()));
    manager.install(fresh_credential()).await;

    let client = AuthenticatedClient::new(server.uri(), manager.clone());
    let result = client.get("/api/v1/projects").await;

    match result {
        Err(ClientError::RateLimited { retry_after_secs }) => assert_eq!(retry_after_secs, 7),
        other => panic!("expected RateLimited, got {:?}", other.map(|r| r.status())),
    }

    manager.sign_out().await;
}

#[tokio::test]
async fn test_policy_fetch_failures_fall_back_safely() {
    let server = MockServer::start().await;

    let manager = SessionManager::new(SessionOptions::new(server.uri()));
    manager.install(fresh_credential()).await;

    // No policy endpoint mounted: the fetch 404s, is swallowed, and
    // the hardcoded default applies.
    manager.refresh_policy().await;
    assert!(manager.cached_policy().is_none());
    assert_eq!(manager.effective_timeout_minutes(), 30);

    // A reachable endpoint fills the cache.
    let policy_mock = Mock::given(method("GET"))
        .and(path("/api/v1/auth/session-policy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "timeoutMinutes": 15,
            "isCompanyEnforced": true,
            "companyTimeout": 15,
            "userTimeout": 60,
            "source": "company",
        })))
        .mount_as_scoped(&server)
        .await;

    manager.refresh_policy().await;
    assert_eq!(manager.effective_timeout_minutes(), 15);

    // When the endpoint goes away again the last-known-good policy
    // keeps applying.
    drop(policy_mock);
    manager.refresh_policy().await;
    assert_eq!(manager.effective_timeout_minutes(), 15);

    manager.sign_out().await;
}

#[tokio::test]
async fn test_company_enforcement_beats_user_preference_in_the_check() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/auth/session-policy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "timeoutMinutes": 15,
            "isCompanyEnforced": true,
            "companyTimeout": 15,
            "userTimeout": 60,
            "source": "company",
        })))
        .mount(&server)
        .await;

    let manager = SessionManager::new(SessionOptions::new(server.uri()));
    manager.install(fresh_credential()).await;
    manager.refresh_policy().await;

    // 20 idle minutes: inside the user's preferred hour, but past the
    // enforced company budget.
    let expired = manager
        .check_inactivity_at(Utc::now() + Duration::minutes(20))
        .await;
    assert!(expired);
    assert_eq!(manager.state(), SessionState::Expired);
}
