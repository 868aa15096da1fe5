//! Database layer
//!
//! SQLite-backed storage for the authorization directory: companies,
//! users, memberships, projects, project role assignments, and agents.
//! The schema is bootstrapped in code so tests can run against
//! `sqlite::memory:` without external migration files.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::{Pool, Sqlite};

use crate::config::DatabaseConfig;

/// Database connection pool type
pub type DbPool = Pool<Sqlite>;

/// Initialize the database connection pool and bootstrap the schema
pub async fn init_pool(config: &DatabaseConfig) -> Result<DbPool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await
        .context("Failed to connect to database")?;

    bootstrap_schema(&pool).await?;

    Ok(pool)
}

async fn bootstrap_schema(pool: &DbPool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS companies (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            tier TEXT NOT NULL DEFAULT 'free',
            session_timeout_minutes INTEGER,
            session_timeout_enforced INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            suspended INTEGER NOT NULL DEFAULT 0,
            session_timeout_minutes INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS memberships (
            user_id TEXT NOT NULL REFERENCES users(id),
            company_id TEXT NOT NULL REFERENCES companies(id),
            role TEXT NOT NULL,
            PRIMARY KEY (user_id, company_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            company_id TEXT NOT NULL REFERENCES companies(id),
            name TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS project_roles (
            user_id TEXT NOT NULL REFERENCES users(id),
            project_id TEXT NOT NULL REFERENCES projects(id),
            role TEXT NOT NULL,
            PRIMARY KEY (user_id, project_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id),
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_memberships_user ON memberships(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_project_roles_user ON project_roles(user_id, project_id)",
        "CREATE INDEX IF NOT EXISTS idx_agents_project ON agents(project_id)",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to bootstrap database schema")?;
    }

    Ok(())
}
