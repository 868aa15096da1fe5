//! Project endpoints
//!
//! Representative resource routes exercising the authorization stage:
//! single-permission requirements, OR-semantics (delete accepts either
//! the project-level or the company-level grant), and response shaping
//! from the effective permission set.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{delete, get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

use crate::{
    middleware::rate_limit::rate_limit_middleware,
    models::Tenant,
    require_permission,
    services::{EffectivePermissionSet, Permission},
    utils::error::{AppError, AppResult},
    AppState,
};

pub fn routes(state: &AppState) -> Router<AppState> {
    let rate_limited = || from_fn_with_state(state.clone(), rate_limit_middleware);

    Router::new()
        .route(
            "/",
            get(list_projects)
                .layer(rate_limited())
                .layer(require_permission!(state, Permission::ProjectView)),
        )
        .route(
            "/{project_id}",
            get(get_project)
                .layer(rate_limited())
                .layer(require_permission!(state, Permission::ProjectView))
                .merge(
                    put(update_project)
                        .layer(rate_limited())
                        .layer(require_permission!(state, Permission::ProjectEdit)),
                )
                .merge(
                    delete(delete_project).layer(rate_limited()).layer(
                        require_permission!(
                            state,
                            Permission::ProjectDelete,
                            Permission::CompanyManage
                        ),
                    ),
                ),
        )
        .route(
            "/{project_id}/transfers",
            get(list_transfers).layer(rate_limited()).layer(
                require_permission!(
                    state,
                    Permission::TransferCreate,
                    Permission::TransferApprove
                ),
            ),
        )
}

#[derive(Debug, Serialize)]
struct ProjectSummary {
    id: Uuid,
    name: String,
}

#[derive(Debug, Deserialize)]
struct UpdateProjectRequest {
    name: String,
}

#[derive(Debug, Serialize)]
struct TransferListResponse {
    project_id: Uuid,
    transfers: Vec<serde_json::Value>,
    /// Present so clients can render approval controls only for
    /// principals that hold the approve grant
    can_approve: bool,
}

/// GET /api/v1/projects
async fn list_projects(
    State(state): State<AppState>,
    tenant: Tenant,
) -> AppResult<Json<Vec<ProjectSummary>>> {
    let rows = sqlx::query("SELECT id, name FROM projects WHERE company_id = ? ORDER BY name")
        .bind(tenant.id.to_string())
        .fetch_all(&state.db)
        .await?;

    let projects = rows
        .into_iter()
        .filter_map(|row| {
            let id: String = row.get("id");
            Some(ProjectSummary {
                id: Uuid::parse_str(&id).ok()?,
                name: row.get("name"),
            })
        })
        .collect();

    Ok(Json(projects))
}

/// GET /api/v1/projects/{project_id}
async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<ProjectSummary>> {
    let row = sqlx::query("SELECT id, name FROM projects WHERE id = ?")
        .bind(project_id.to_string())
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;

    Ok(Json(ProjectSummary {
        id: project_id,
        name: row.get("name"),
    }))
}

/// PUT /api/v1/projects/{project_id}
async fn update_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<UpdateProjectRequest>,
) -> AppResult<Json<ProjectSummary>> {
    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("Project name cannot be empty".to_string()));
    }

    let result = sqlx::query("UPDATE projects SET name = ? WHERE id = ?")
        .bind(payload.name.trim())
        .bind(project_id.to_string())
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Project not found".to_string()));
    }

    Ok(Json(ProjectSummary {
        id: project_id,
        name: payload.name.trim().to_string(),
    }))
}

/// DELETE /api/v1/projects/{project_id}
async fn delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let result = sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(project_id.to_string())
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Project not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/projects/{project_id}/transfers
async fn list_transfers(
    Path(project_id): Path<Uuid>,
    permissions: EffectivePermissionSet,
) -> AppResult<Json<TransferListResponse>> {
    // Transfer records live in the data plane; this surface reports the
    // caller's capabilities alongside the (externally sourced) list.
    Ok(Json(TransferListResponse {
        project_id,
        transfers: Vec::new(),
        can_approve: permissions.contains(Permission::TransferApprove),
    }))
}
