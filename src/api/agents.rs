//! Agent credential endpoints
//!
//! Issues long-lived machine credentials scoped to a single project.

use axum::{
    extract::{Path, State},
    middleware::from_fn_with_state,
    routing::post,
    Json, Router,
};
use uuid::Uuid;

use crate::{
    middleware::auth::create_agent_token,
    middleware::rate_limit::strict_rate_limit_middleware,
    models::{AgentTokenResponse, Tenant},
    require_permission,
    services::Permission,
    utils::error::{AppError, AppResult},
    AppState,
};

pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new().route(
        "/{agent_id}/token",
        post(issue_agent_token)
            .layer(from_fn_with_state(
                state.clone(),
                strict_rate_limit_middleware,
            ))
            .layer(require_permission!(state, Permission::AgentCreate)),
    )
}

/// POST /api/v1/agents/{agent_id}/token
async fn issue_agent_token(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(agent_id): Path<Uuid>,
) -> AppResult<Json<AgentTokenResponse>> {
    let record = state
        .directory
        .agent(agent_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound("Agent not found".to_string()))?;

    // Agents outside the caller's tenant read as nonexistent.
    if record.company_id != tenant.id {
        return Err(AppError::NotFound("Agent not found".to_string()));
    }

    let (token, expires_at) = create_agent_token(
        record.id,
        record.project_id,
        &state.config.auth.jwt_secret,
        state.config.auth.agent_token_expiry_days,
    )
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(AgentTokenResponse {
        token,
        agent_id: record.id,
        project_id: record.project_id,
        expires_at,
    }))
}
