//! Credential verification middleware
//!
//! First stage of the request pipeline. Extracts the bearer token,
//! verifies signature and expiry, and attaches the authenticated
//! principal to request extensions.
//!
//! Two credential shapes exist, distinguished by the `type` claim:
//! end-user tokens (short-lived, subject to the full pipeline) and
//! machine/agent tokens (project-scoped, long-lived). Agent requests
//! verify the referenced agent record is active and bypass tenant,
//! suspension, and permission stages; their project scope is enforced
//! by the authorization stage.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{utils::error::AppError, AppState};

/// Token type for user credentials (access or refresh)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    #[default]
    Access,
    Refresh,
}

/// Claims carried by an end-user credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Verified email
    pub email: String,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
    /// Unique identifier for this token
    pub jti: String,
    #[serde(default)]
    pub token_type: TokenType,
}

/// Claims carried by a machine/agent credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentClaims {
    pub agent_id: String,
    pub project_id: String,
    pub iat: i64,
    pub exp: i64,
}

/// The two credential shapes, tagged by the `type` claim
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Claims {
    User(UserClaims),
    Agent(AgentClaims),
}

/// Authenticated end-user identity
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
}

/// Authenticated agent identity, scoped to one project
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub agent_id: Uuid,
    pub project_id: Uuid,
}

/// The principal attached to request extensions by this stage
#[derive(Debug, Clone)]
pub enum RequestPrincipal {
    User(Principal),
    Agent(AgentContext),
}

impl RequestPrincipal {
    /// Rate-limit key component for this principal
    pub fn rate_limit_key(&self) -> String {
        match self {
            RequestPrincipal::User(p) => format!("user:{}", p.id),
            RequestPrincipal::Agent(a) => format!("agent:{}", a.agent_id),
        }
    }
}

/// Extractor for any authenticated principal
impl<S> FromRequestParts<S> for RequestPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestPrincipal>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

/// Extractor for handlers that only serve end users
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match RequestPrincipal::from_request_parts(parts, state).await? {
            RequestPrincipal::User(principal) => Ok(principal),
            RequestPrincipal::Agent(_) => Err(AppError::Forbidden(
                "This endpoint requires a user credential".to_string(),
            )),
        }
    }
}

/// Create a new access token for a user
pub fn create_access_token(
    user_id: Uuid,
    email: &str,
    secret: &str,
    expiry_hours: u64,
) -> Result<(String, DateTime<Utc>), jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let exp = now + Duration::hours(expiry_hours as i64);

    let claims = Claims::User(UserClaims {
        sub: user_id.to_string(),
        email: email.to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
        jti: Uuid::new_v4().to_string(),
        token_type: TokenType::Access,
    });

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok((token, exp))
}

/// Create a new refresh token for a user
pub fn create_refresh_token(
    user_id: Uuid,
    email: &str,
    secret: &str,
    expiry_days: u64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let exp = now + Duration::days(expiry_days as i64);

    let claims = Claims::User(UserClaims {
        sub: user_id.to_string(),
        email: email.to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
        jti: Uuid::new_v4().to_string(),
        token_type: TokenType::Refresh,
    });

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Create a machine credential for an agent, scoped to its project
pub fn create_agent_token(
    agent_id: Uuid,
    project_id: Uuid,
    secret: &str,
    expiry_days: u64,
) -> Result<(String, DateTime<Utc>), jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let exp = now + Duration::days(expiry_days as i64);

    let claims = Claims::Agent(AgentClaims {
        agent_id: agent_id.to_string(),
        project_id: project_id.to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    });

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok((token, exp))
}

/// Validate and decode a credential of either shape
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    let mut validation = Validation::default();
    validation.validate_exp = true;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::TokenExpired,
        _ => AppError::Unauthorized("Invalid authentication token".to_string()),
    })
}

/// Extract bearer token from an Authorization header value
fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
}

fn parse_claim_uuid(value: &str, what: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(value)
        .map_err(|_| AppError::Unauthorized(format!("Invalid {} in token", what)))
}

/// Credential verification middleware (pipeline stage 1)
///
/// On success, injects [`RequestPrincipal`] into request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authentication token".to_string()))?;

    let token = extract_bearer_token(auth_header)
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization header".to_string()))?;

    let principal = match validate_token(token, &state.config.auth.jwt_secret)? {
        Claims::User(claims) => {
            if claims.token_type != TokenType::Access {
                return Err(AppError::Unauthorized(
                    "Refresh tokens cannot be used for API requests".to_string(),
                ));
            }
            RequestPrincipal::User(Principal {
                id: parse_claim_uuid(&claims.sub, "user ID")?,
                email: claims.email,
            })
        }
        Claims::Agent(claims) => {
            let agent_id = parse_claim_uuid(&claims.agent_id, "agent ID")?;
            let project_id = parse_claim_uuid(&claims.project_id, "project ID")?;

            let record = state
                .directory
                .agent(agent_id)
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?
                .ok_or_else(|| AppError::Unauthorized("Unknown agent".to_string()))?;

            // The token's project binding must match the agent record,
            // whatever the agent's current status.
            if record.project_id != project_id {
                return Err(AppError::Unauthorized(
                    "Agent token project mismatch".to_string(),
                ));
            }
            if !record.status.is_active() {
                return Err(AppError::Unauthorized("Agent is not active".to_string()));
            }

            RequestPrincipal::Agent(AgentContext {
                agent_id,
                project_id,
            })
        }
    };

    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}
