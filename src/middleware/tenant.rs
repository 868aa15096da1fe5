//! Tenant resolution and suspension check middleware
//!
//! Stages 2 and 3 of the request pipeline, run after credential
//! verification and before any permission computation. Both stages are
//! single indexed lookups; neither is cached across requests.
//!
//! A user credential without a company membership cannot make
//! authenticated requests. Suspension is a hard stop that overrides
//! every role the account still holds, which is why it runs before the
//! authorization stage.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::{
    middleware::auth::RequestPrincipal,
    models::Tenant,
    utils::error::AppError,
    AppState,
};

/// Extractor for the resolved tenant
impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Tenant>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Tenant context required".to_string()))
    }
}

/// Tenant resolution middleware (pipeline stage 2)
///
/// Attaches [`Tenant`] and the principal's
/// [`crate::services::permissions::CompanyRole`] to request extensions.
/// Agent principals carry their own project scope and pass through.
pub async fn tenant_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = request
        .extensions()
        .get::<RequestPrincipal>()
        .cloned()
        .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;

    if let RequestPrincipal::User(user) = principal {
        let membership = state
            .directory
            .membership(user.id)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?
            .ok_or_else(|| {
                AppError::Unauthorized("User has no company membership".to_string())
            })?;

        debug!(user = %user.id, company = %membership.company_id, "Resolved tenant");

        request.extensions_mut().insert(Tenant {
            id: membership.company_id,
            name: membership.company_name,
            tier: membership.tier,
        });
        request.extensions_mut().insert(membership.role);
    }

    Ok(next.run(request).await)
}

/// Suspension check middleware (pipeline stage 3)
pub async fn suspension_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(RequestPrincipal::User(user)) = request.extensions().get::<RequestPrincipal>() {
        match state
            .directory
            .is_suspended(user.id)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?
        {
            None => {
                return Err(AppError::Unauthorized("Unknown user".to_string()));
            }
            Some(true) => {
                debug!(user = %user.id, "Rejected suspended account");
                return Err(AppError::Suspended);
            }
            Some(false) => {}
        }
    }

    Ok(next.run(request).await)
}
