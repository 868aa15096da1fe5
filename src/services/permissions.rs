//! Permission catalog and resolver
//!
//! Permissions are a closed set known at build time, namespaced as
//! `resource:action`. Two independent role axes grant them: the company
//! role (one per membership) and an optional per-project role. The
//! effective set for a request is the union of both grants.
//!
//! The registry is immutable after construction. The owner role's grant is
//! derived from [`Permission::all`] rather than listed by hand, so the
//! catalog and the owner set cannot drift apart.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// A single grantable permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "company:view")]
    CompanyView,
    #[serde(rename = "company:manage")]
    CompanyManage,
    #[serde(rename = "project:create")]
    ProjectCreate,
    #[serde(rename = "project:view")]
    ProjectView,
    #[serde(rename = "project:edit")]
    ProjectEdit,
    #[serde(rename = "project:delete")]
    ProjectDelete,
    #[serde(rename = "member:invite")]
    MemberInvite,
    #[serde(rename = "member:remove")]
    MemberRemove,
    #[serde(rename = "agent:create")]
    AgentCreate,
    #[serde(rename = "agent:edit")]
    AgentEdit,
    #[serde(rename = "agent:delete")]
    AgentDelete,
    #[serde(rename = "transfer:create")]
    TransferCreate,
    #[serde(rename = "transfer:approve")]
    TransferApprove,
    #[serde(rename = "billing:view")]
    BillingView,
    #[serde(rename = "billing:manage")]
    BillingManage,
}

impl Permission {
    /// The full catalog
    pub fn all() -> &'static [Permission] {
        &[
            Permission::CompanyView,
            Permission::CompanyManage,
            Permission::ProjectCreate,
            Permission::ProjectView,
            Permission::ProjectEdit,
            Permission::ProjectDelete,
            Permission::MemberInvite,
            Permission::MemberRemove,
            Permission::AgentCreate,
            Permission::AgentEdit,
            Permission::AgentDelete,
            Permission::TransferCreate,
            Permission::TransferApprove,
            Permission::BillingView,
            Permission::BillingManage,
        ]
    }

    /// Wire representation (`resource:action`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::CompanyView => "company:view",
            Permission::CompanyManage => "company:manage",
            Permission::ProjectCreate => "project:create",
            Permission::ProjectView => "project:view",
            Permission::ProjectEdit => "project:edit",
            Permission::ProjectDelete => "project:delete",
            Permission::MemberInvite => "member:invite",
            Permission::MemberRemove => "member:remove",
            Permission::AgentCreate => "agent:create",
            Permission::AgentEdit => "agent:edit",
            Permission::AgentDelete => "agent:delete",
            Permission::TransferCreate => "transfer:create",
            Permission::TransferApprove => "transfer:approve",
            Permission::BillingView => "billing:view",
            Permission::BillingManage => "billing:manage",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Company-level role, assigned once per (user, company) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompanyRole {
    Owner,
    Admin,
    Member,
}

impl CompanyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompanyRole::Owner => "owner",
            CompanyRole::Admin => "admin",
            CompanyRole::Member => "member",
        }
    }
}

impl std::str::FromStr for CompanyRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(CompanyRole::Owner),
            "admin" => Ok(CompanyRole::Admin),
            "member" => Ok(CompanyRole::Member),
            _ => Err(format!("Invalid company role: {}", s)),
        }
    }
}

/// Project-level role, assigned per (user, project) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectRole {
    Admin,
    Editor,
    Viewer,
}

impl ProjectRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectRole::Admin => "admin",
            ProjectRole::Editor => "editor",
            ProjectRole::Viewer => "viewer",
        }
    }
}

impl std::str::FromStr for ProjectRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(ProjectRole::Admin),
            "editor" => Ok(ProjectRole::Editor),
            "viewer" => Ok(ProjectRole::Viewer),
            _ => Err(format!("Invalid project role: {}", s)),
        }
    }
}

/// The permissions a request actually holds: the union of its company-role
/// grant and, when the request targets a project, its project-role grant.
#[derive(Debug, Clone, Serialize, Default)]
pub struct EffectivePermissionSet(HashSet<Permission>);

impl EffectivePermissionSet {
    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    /// OR-semantics check: true if any of the given permissions is held
    pub fn contains_any(&self, permissions: &[Permission]) -> bool {
        permissions.iter().any(|p| self.0.contains(p))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }

    /// Superset check, used by the monotonicity tests
    pub fn is_superset(&self, other: &EffectivePermissionSet) -> bool {
        self.0.is_superset(&other.0)
    }
}

impl FromIterator<Permission> for EffectivePermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Immutable role-to-permission maps, built once at process start
pub struct PermissionRegistry {
    company: HashMap<CompanyRole, Vec<Permission>>,
    project: HashMap<ProjectRole, Vec<Permission>>,
}

impl PermissionRegistry {
    fn build() -> Self {
        let mut company = HashMap::new();

        // Owner holds the entire catalog by construction.
        company.insert(CompanyRole::Owner, Permission::all().to_vec());
        company.insert(
            CompanyRole::Admin,
            vec![
                Permission::CompanyView,
                Permission::ProjectCreate,
                Permission::ProjectView,
                Permission::ProjectEdit,
                Permission::ProjectDelete,
                Permission::MemberInvite,
                Permission::MemberRemove,
                Permission::AgentCreate,
                Permission::AgentEdit,
                Permission::AgentDelete,
                Permission::TransferCreate,
                Permission::TransferApprove,
                Permission::BillingView,
            ],
        );
        company.insert(
            CompanyRole::Member,
            vec![
                Permission::CompanyView,
                Permission::ProjectView,
                Permission::TransferCreate,
            ],
        );

        let mut project = HashMap::new();
        project.insert(
            ProjectRole::Admin,
            vec![
                Permission::ProjectView,
                Permission::ProjectEdit,
                Permission::ProjectDelete,
                Permission::AgentCreate,
                Permission::AgentEdit,
                Permission::AgentDelete,
                Permission::TransferCreate,
                Permission::TransferApprove,
            ],
        );
        project.insert(
            ProjectRole::Editor,
            vec![
                Permission::ProjectView,
                Permission::ProjectEdit,
                Permission::AgentEdit,
                Permission::TransferCreate,
            ],
        );
        project.insert(ProjectRole::Viewer, vec![Permission::ProjectView]);

        Self { company, project }
    }

    /// Permissions granted by a company role
    pub fn company_permissions(&self, role: CompanyRole) -> &[Permission] {
        // Every role is inserted in build(); the maps are never mutated.
        &self.company[&role]
    }

    /// Permissions granted by a project role
    pub fn project_permissions(&self, role: ProjectRole) -> &[Permission] {
        &self.project[&role]
    }

    /// Compute the effective permission set for a request.
    ///
    /// Pure function of the two role inputs; no I/O. Requests without a
    /// project context resolve against the company role alone.
    pub fn resolve(
        &self,
        company_role: CompanyRole,
        project_role: Option<ProjectRole>,
    ) -> EffectivePermissionSet {
        let mut set: HashSet<Permission> =
            self.company_permissions(company_role).iter().copied().collect();

        if let Some(role) = project_role {
            set.extend(self.project_permissions(role).iter().copied());
        }

        EffectivePermissionSet(set)
    }
}

static REGISTRY: Lazy<PermissionRegistry> = Lazy::new(PermissionRegistry::build);

/// The process-wide registry instance
pub fn registry() -> &'static PermissionRegistry {
    &REGISTRY
}
