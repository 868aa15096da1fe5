//! Authentication API endpoints
//!
//! Login and refresh issue the user token pair; both sit behind the
//! strict rate limiter since credential issuance is the sensitive
//! operation worth a budget of its own. The session-policy endpoint
//! feeds the client-side inactivity monitor.

use axum::{
    extract::State,
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    middleware::auth::{
        create_access_token, create_refresh_token, validate_token, Claims, Principal, TokenType,
    },
    middleware::rate_limit::{rate_limit_middleware, strict_rate_limit_middleware},
    models::{LoginRequest, RefreshRequest, SessionPolicy, TokenResponse},
    services::AuthService,
    utils::error::{AppError, AppResult},
    AppState,
};

/// Public authentication routes (credential issuance)
pub fn public_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/login",
            post(login).layer(from_fn_with_state(
                state.clone(),
                strict_rate_limit_middleware,
            )),
        )
        .route(
            "/refresh",
            post(refresh).layer(from_fn_with_state(
                state.clone(),
                strict_rate_limit_middleware,
            )),
        )
}

/// Protected authentication routes
pub fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new().route(
        "/session-policy",
        get(session_policy).layer(from_fn_with_state(state.clone(), rate_limit_middleware)),
    )
}

/// POST /api/v1/auth/login
async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    payload.validate()?;

    let auth_service = AuthService::new(state.db.clone());
    let user = auth_service
        .authenticate(&payload.email, &payload.password)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::Unauthorized("Invalid email or password".to_string()))?;

    if user.suspended {
        return Err(AppError::Suspended);
    }

    issue_token_pair(&state, user.id, &user.email)
}

/// POST /api/v1/auth/refresh
async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let claims = match validate_token(&payload.refresh_token, &state.config.auth.jwt_secret)? {
        Claims::User(claims) => claims,
        Claims::Agent(_) => {
            return Err(AppError::Unauthorized(
                "Agent credentials cannot be refreshed".to_string(),
            ));
        }
    };

    if claims.token_type != TokenType::Refresh {
        return Err(AppError::Unauthorized("Not a refresh token".to_string()));
    }

    let user_id = claims
        .sub
        .parse()
        .map_err(|_| AppError::Unauthorized("Invalid user ID in token".to_string()))?;

    // The account must still exist and be in good standing; a refresh
    // token outliving a suspension must not mint new credentials.
    let user = AuthService::new(state.db.clone())
        .get_user_by_id(user_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::Unauthorized("Unknown user".to_string()))?;

    if user.suspended {
        return Err(AppError::Suspended);
    }

    issue_token_pair(&state, user.id, &user.email)
}

/// GET /api/v1/auth/session-policy
async fn session_policy(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<SessionPolicy>> {
    let row = state
        .directory
        .timeout_policy(principal.id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(SessionPolicy::resolve(
        row.company_timeout,
        row.company_enforced,
        row.user_timeout,
    )))
}

fn issue_token_pair(
    state: &AppState,
    user_id: uuid::Uuid,
    email: &str,
) -> AppResult<Json<TokenResponse>> {
    let auth = &state.config.auth;

    let (access_token, expires_at) =
        create_access_token(user_id, email, &auth.jwt_secret, auth.token_expiry_hours)
            .map_err(|e| AppError::Internal(e.to_string()))?;
    let refresh_token = create_refresh_token(
        user_id,
        email,
        &auth.jwt_secret,
        auth.refresh_token_expiry_days,
    )
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(TokenResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: (expires_at - Utc::now()).num_seconds(),
        expires_at,
    }))
}
