//! Middleware components
//!
//! The request pipeline runs these stages in a fixed order:
//! credential verification, tenant resolution, suspension check,
//! authorization, rate limiting. Each stage enriches request extensions
//! or short-circuits with a typed failure; the ordering is a contract
//! (suspension is checked before roles are consulted, and quota is only
//! consumed by requests that passed authorization).

pub mod auth;
pub mod authorize;
pub mod rate_limit;
pub mod tenant;

pub use auth::{auth_middleware, AgentContext, Claims, Principal, RequestPrincipal};
pub use authorize::{require_permission_middleware, RequiredPermission};
pub use rate_limit::{
    rate_limit_middleware, spawn_rate_limit_sweep, strict_rate_limit_middleware, Admission,
    CounterStore, MemoryCounterStore, RateLimitState,
};
pub use tenant::{suspension_middleware, tenant_middleware};
