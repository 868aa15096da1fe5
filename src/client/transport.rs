//! Authenticated transport
//!
//! Request-dispatch wrapper that consults the session manager before
//! every call: a session past its inactivity budget is expired without
//! sending, and a 401 response triggers exactly one refresh-and-retry
//! cycle before the session is declared dead.

use reqwest::{Method, StatusCode};
use thiserror::Error;

use super::session::{SessionError, SessionManager};

/// Transport errors surfaced to calling code
#[derive(Debug, Error)]
pub enum ClientError {
    /// The session is expired or was never signed in; the caller
    /// should redirect to re-authentication.
    #[error("Session has expired")]
    SessionExpired,

    /// The credential was rejected and one renewal did not help
    #[error("Request rejected as unauthorized")]
    Unauthorized,

    /// Quota exhausted; back off for the given number of seconds
    #[error("Rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// HTTP client that attaches and maintains the session credential
#[derive(Clone)]
pub struct AuthenticatedClient {
    http: reqwest::Client,
    base_url: String,
    session: SessionManager,
}

impl AuthenticatedClient {
    pub fn new(base_url: impl Into<String>, session: SessionManager) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            session,
        }
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response, ClientError> {
        self.dispatch(Method::GET, path, None).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, ClientError> {
        self.dispatch(Method::POST, path, Some(body)).await
    }

    pub async fn put_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, ClientError> {
        self.dispatch(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<reqwest::Response, ClientError> {
        self.dispatch(Method::DELETE, path, None).await
    }

    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, ClientError> {
        // An idle-timed-out session is expired here, before anything
        // goes on the wire.
        let token = self.session.ensure_active().await.map_err(map_session_error)?;

        let response = self.send(method.clone(), path, body.as_ref(), &token).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return reject_rate_limited(response);
        }

        // One refresh-and-retry cycle, never more: a credential that
        // survives a renewal and still 401s is permanently invalid.
        let renewed = self
            .session
            .refresh()
            .await
            .map_err(|_| ClientError::Unauthorized)?;

        let retried = self
            .send(method, path, body.as_ref(), &renewed.access_token)
            .await?;

        if retried.status() == StatusCode::UNAUTHORIZED {
            self.session.force_expire().await;
            return Err(ClientError::Unauthorized);
        }

        reject_rate_limited(retried)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        token: &str,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );

        let mut request = self.http.request(method, &url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await
    }
}

fn map_session_error(err: SessionError) -> ClientError {
    match err {
        SessionError::NotSignedIn | SessionError::Expired => ClientError::SessionExpired,
        SessionError::RefreshFailed(_) => ClientError::Unauthorized,
    }
}

fn reject_rate_limited(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    if response.status() == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        return Err(ClientError::RateLimited { retry_after_secs });
    }
    Ok(response)
}
