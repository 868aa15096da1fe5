//! Authorization directory lookups
//!
//! The middleware pipeline re-derives the principal's tenant, suspension
//! flag, and role assignments on every request from one or two indexed
//! lookups. The [`Directory`] trait is the seam to the relational store;
//! [`SqliteDirectory`] is the shipped implementation.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use crate::db::DbPool;
use crate::models::SubscriptionTier;
use crate::services::permissions::{CompanyRole, ProjectRole};

/// A principal's company membership, with the tenant context it resolves to
#[derive(Debug, Clone)]
pub struct Membership {
    pub company_id: Uuid,
    pub company_name: String,
    pub tier: SubscriptionTier,
    pub role: CompanyRole,
}

/// Agent lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Active,
    Paused,
    Retired,
}

impl AgentStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, AgentStatus::Active)
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AgentStatus::Active),
            "paused" => Ok(AgentStatus::Paused),
            "retired" => Ok(AgentStatus::Retired),
            _ => Err(format!("Invalid agent status: {}", s)),
        }
    }
}

/// An agent row joined with its project's company
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub company_id: Uuid,
    pub status: AgentStatus,
}

/// Raw timeout policy layers for a user, before resolution
#[derive(Debug, Clone, Default)]
pub struct TimeoutPolicyRow {
    pub company_timeout: Option<i64>,
    pub company_enforced: bool,
    pub user_timeout: Option<i64>,
}

/// Authoritative lookups consumed by the middleware pipeline.
///
/// Implementations must answer from indexed queries; no stage may scan.
#[async_trait]
pub trait Directory: Send + Sync {
    /// The principal's company membership, or None for orphaned users.
    ///
    /// This deployment assumes single-company membership; more than one
    /// row is an error, never a silent pick.
    async fn membership(&self, user_id: Uuid) -> Result<Option<Membership>>;

    /// Suspension flag; None when the user no longer exists
    async fn is_suspended(&self, user_id: Uuid) -> Result<Option<bool>>;

    /// The principal's role on a specific project, if assigned
    async fn project_role(&self, user_id: Uuid, project_id: Uuid)
        -> Result<Option<ProjectRole>>;

    /// The company a project belongs to
    async fn project_company(&self, project_id: Uuid) -> Result<Option<Uuid>>;

    /// Agent record with its owning project and company
    async fn agent(&self, agent_id: Uuid) -> Result<Option<AgentRecord>>;

    /// Timeout policy layers for the session-policy endpoint
    async fn timeout_policy(&self, user_id: Uuid) -> Result<TimeoutPolicyRow>;
}

/// SQLite-backed directory
pub struct SqliteDirectory {
    pool: DbPool,
}

impl SqliteDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_uuid(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid {} in database", what))
}

#[async_trait]
impl Directory for SqliteDirectory {
    async fn membership(&self, user_id: Uuid) -> Result<Option<Membership>> {
        let rows = sqlx::query(
            r#"
            SELECT m.company_id, m.role, c.name, c.tier
            FROM memberships m
            INNER JOIN companies c ON c.id = m.company_id
            WHERE m.user_id = ?
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch membership")?;

        if rows.len() > 1 {
            bail!("multi-company membership is unsupported (user {})", user_id);
        }

        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        let company_id: String = row.get("company_id");
        let role: String = row.get("role");
        let tier: String = row.get("tier");

        Ok(Some(Membership {
            company_id: parse_uuid(&company_id, "company id")?,
            company_name: row.get("name"),
            tier: tier
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid subscription tier in database")?,
            role: role
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid company role in database")?,
        }))
    }

    async fn is_suspended(&self, user_id: Uuid) -> Result<Option<bool>> {
        let row = sqlx::query("SELECT suspended FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch suspension flag")?;

        Ok(row.map(|r| r.get::<i64, _>("suspended") != 0))
    }

    async fn project_role(
        &self,
        user_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<ProjectRole>> {
        let row = sqlx::query(
            "SELECT role FROM project_roles WHERE user_id = ? AND project_id = ?",
        )
        .bind(user_id.to_string())
        .bind(project_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch project role")?;

        row.map(|r| {
            r.get::<String, _>("role")
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid project role in database")
        })
        .transpose()
    }

    async fn project_company(&self, project_id: Uuid) -> Result<Option<Uuid>> {
        let row = sqlx::query("SELECT company_id FROM projects WHERE id = ?")
            .bind(project_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch project")?;

        row.map(|r| parse_uuid(&r.get::<String, _>("company_id"), "company id"))
            .transpose()
    }

    async fn agent(&self, agent_id: Uuid) -> Result<Option<AgentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT a.id, a.project_id, a.status, p.company_id
            FROM agents a
            INNER JOIN projects p ON p.id = a.project_id
            WHERE a.id = ?
            "#,
        )
        .bind(agent_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch agent")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.get("status");

        Ok(Some(AgentRecord {
            id: parse_uuid(&row.get::<String, _>("id"), "agent id")?,
            project_id: parse_uuid(&row.get::<String, _>("project_id"), "project id")?,
            company_id: parse_uuid(&row.get::<String, _>("company_id"), "company id")?,
            status: status
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid agent status in database")?,
        }))
    }

    async fn timeout_policy(&self, user_id: Uuid) -> Result<TimeoutPolicyRow> {
        let row = sqlx::query(
            r#"
            SELECT u.session_timeout_minutes AS user_timeout,
                   c.session_timeout_minutes AS company_timeout,
                   c.session_timeout_enforced AS company_enforced
            FROM users u
            LEFT JOIN memberships m ON m.user_id = u.id
            LEFT JOIN companies c ON c.id = m.company_id
            WHERE u.id = ?
            "#,
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch timeout policy")?;

        let Some(row) = row else {
            return Ok(TimeoutPolicyRow::default());
        };

        Ok(TimeoutPolicyRow {
            company_timeout: row.try_get::<Option<i64>, _>("company_timeout").ok().flatten(),
            company_enforced: row
                .try_get::<Option<i64>, _>("company_enforced")
                .ok()
                .flatten()
                .unwrap_or(0)
                != 0,
            user_timeout: row.try_get::<Option<i64>, _>("user_timeout").ok().flatten(),
        })
    }
}
