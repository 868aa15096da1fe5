//! Business logic services

pub mod auth;
pub mod directory;
pub mod permissions;

pub use auth::AuthService;
pub use directory::{AgentRecord, AgentStatus, Directory, Membership, SqliteDirectory};
pub use permissions::{
    registry, CompanyRole, EffectivePermissionSet, Permission, PermissionRegistry, ProjectRole,
};
