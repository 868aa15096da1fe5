//! Authentication service
//!
//! Password hashing with Argon2 and user lookup for the credential
//! issuance endpoints.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use sqlx::Row;
use uuid::Uuid;

use crate::db::DbPool;

/// A user row as needed by login and refresh
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub suspended: bool,
}

/// Authentication service for credential issuance
pub struct AuthService {
    pool: DbPool,
}

impl AuthService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Hash a password using Argon2id
    pub fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();
        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
            .to_string();
        Ok(password_hash)
    }

    /// Verify a password against a hash
    pub fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(password_hash)
            .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    /// Authenticate a user by email and password
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Option<UserAccount>> {
        let user = self.get_user_by_email(email).await?;

        match user {
            Some(user) => {
                if Self::verify_password(password, &user.password_hash)? {
                    Ok(Some(user))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Get a user by email
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserAccount>> {
        let row = sqlx::query(
            "SELECT id, email, password_hash, suspended FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by email")?;

        row.map(row_to_account).transpose()
    }

    /// Get a user by ID
    pub async fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserAccount>> {
        let row = sqlx::query(
            "SELECT id, email, password_hash, suspended FROM users WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by ID")?;

        row.map(row_to_account).transpose()
    }
}

fn row_to_account(row: sqlx::sqlite::SqliteRow) -> Result<UserAccount> {
    let id: String = row.get("id");
    Ok(UserAccount {
        id: Uuid::parse_str(&id).context("Invalid user id in database")?,
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        suspended: row.get::<i64, _>("suspended") != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_password() {
        let hash = AuthService::hash_password("correct horse battery").unwrap();
        assert!(AuthService::verify_password("correct horse battery", &hash).unwrap());
        assert!(!AuthService::verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn test_invalid_hash_format() {
        assert!(AuthService::verify_password("anything", "not-a-hash").is_err());
    }
}
