//! Authorization middleware
//!
//! Stage 4 of the request pipeline. Resolves the principal's effective
//! permission set from its two role axes and enforces the permission a
//! route requires. Runs before rate limiting so unauthorized traffic
//! never consumes a tenant's quota.
//!
//! The project role is looked up only when the request path carries a
//! `{project_id}` segment; requests without project context resolve
//! against the company role alone. Agent principals skip permission
//! computation entirely; their token's project binding is enforced here
//! against the path.

use axum::{
    extract::{FromRequestParts, RawPathParams, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    middleware::auth::RequestPrincipal,
    models::Tenant,
    services::permissions::{registry, CompanyRole, EffectivePermissionSet, Permission},
    utils::error::AppError,
    AppState,
};

/// Permission requirement for a route: the principal must hold at least
/// one of the listed permissions.
#[derive(Debug, Clone)]
pub struct RequiredPermission {
    any_of: Vec<Permission>,
}

impl RequiredPermission {
    pub fn one(permission: Permission) -> Self {
        Self {
            any_of: vec![permission],
        }
    }

    /// OR-semantics requirement
    pub fn any_of(permissions: Vec<Permission>) -> Self {
        Self { any_of: permissions }
    }

    fn describe(&self) -> String {
        self.any_of
            .iter()
            .map(Permission::as_str)
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

/// Extractor for the permission set computed by this stage
impl<S> FromRequestParts<S> for EffectivePermissionSet
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<EffectivePermissionSet>()
            .cloned()
            .ok_or_else(|| AppError::Forbidden("Permission context required".to_string()))
    }
}

/// Extract and parse the `{project_id}` path segment, if the route has one
fn project_id_from_path(params: &RawPathParams) -> Result<Option<Uuid>, AppError> {
    for (name, value) in params.iter() {
        if name == "project_id" {
            let id = Uuid::parse_str(value)
                .map_err(|_| AppError::Validation("Invalid project id".to_string()))?;
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// Authorization middleware (pipeline stage 4)
///
/// On success, attaches [`EffectivePermissionSet`] to request extensions
/// so handlers can shape responses by capability.
pub async fn require_permission_middleware(
    State(state): State<AppState>,
    params: RawPathParams,
    mut request: Request,
    next: Next,
    required: RequiredPermission,
) -> Result<Response, AppError> {
    let principal = request
        .extensions()
        .get::<RequestPrincipal>()
        .cloned()
        .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;

    let project_id = project_id_from_path(&params)?;

    match principal {
        RequestPrincipal::Agent(agent) => {
            // Machine credentials are bound to one project; the binding
            // was already checked against the agent record, so only the
            // path scope remains.
            if let Some(project_id) = project_id {
                if project_id != agent.project_id {
                    return Err(AppError::Unauthorized(
                        "Agent token is not valid for this project".to_string(),
                    ));
                }
            }
            // Agents carry no role grants; handlers that shape output
            // by capability see an empty set.
            request
                .extensions_mut()
                .insert(EffectivePermissionSet::default());
        }
        RequestPrincipal::User(user) => {
            let company_role = request
                .extensions()
                .get::<CompanyRole>()
                .copied()
                .ok_or_else(|| {
                    AppError::Internal("Tenant stage did not run before authorization".to_string())
                })?;
            let tenant = request.extensions().get::<Tenant>().cloned().ok_or_else(|| {
                AppError::Internal("Tenant stage did not run before authorization".to_string())
            })?;

            let project_role = match project_id {
                Some(project_id) => {
                    let owner = state
                        .directory
                        .project_company(project_id)
                        .await
                        .map_err(|e| AppError::Internal(e.to_string()))?
                        .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;

                    // Cross-tenant project ids read as nonexistent.
                    if owner != tenant.id {
                        return Err(AppError::NotFound("Project not found".to_string()));
                    }

                    state
                        .directory
                        .project_role(user.id, project_id)
                        .await
                        .map_err(|e| AppError::Internal(e.to_string()))?
                }
                None => None,
            };

            let permissions = registry().resolve(company_role, project_role);

            if !permissions.contains_any(&required.any_of) {
                debug!(
                    user = %user.id,
                    required = %required.describe(),
                    "Permission denied"
                );
                return Err(AppError::Forbidden(format!(
                    "Missing required permission: {}",
                    required.describe()
                )));
            }

            request.extensions_mut().insert(permissions);
        }
    }

    Ok(next.run(request).await)
}

/// Layer a permission requirement onto a route.
///
/// Usage:
/// ```ignore
/// Router::new().route(
///     "/{project_id}",
///     put(update_project).layer(require_permission!(state, Permission::ProjectEdit)),
/// )
/// ```
#[macro_export]
macro_rules! require_permission {
    ($state:expr, $($perm:expr),+ $(,)?) => {
        axum::middleware::from_fn_with_state(
            $state.clone(),
            move |state: axum::extract::State<$crate::AppState>,
                  params: axum::extract::RawPathParams,
                  request: axum::extract::Request,
                  next: axum::middleware::Next| {
                $crate::middleware::authorize::require_permission_middleware(
                    state,
                    params,
                    request,
                    next,
                    $crate::middleware::authorize::RequiredPermission::any_of(vec![$($perm),+]),
                )
            },
        )
    };
}
