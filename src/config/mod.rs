//! Configuration management
//!
//! YAML-based configuration with environment variable overrides and
//! default values for all settings. Loaded once at startup and shared
//! through [`crate::AppState`].

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::SubscriptionTier;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// TLS configuration (if not set, server runs HTTP)
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls: None,
        }
    }
}

/// TLS configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to TLS certificate file (PEM format)
    pub cert_file: PathBuf,
    /// Path to TLS private key file (PEM format)
    pub key_file: PathBuf,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5080
}

/// Authentication and token lifetime configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_token_expiry")]
    pub token_expiry_hours: u64,
    #[serde(default = "default_refresh_expiry")]
    pub refresh_token_expiry_days: u64,
    /// Machine/agent credential lifetime
    #[serde(default = "default_agent_token_expiry")]
    pub agent_token_expiry_days: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_expiry_hours: default_token_expiry(),
            refresh_token_expiry_days: default_refresh_expiry(),
            agent_token_expiry_days: default_agent_token_expiry(),
        }
    }
}

fn default_jwt_secret() -> String {
    // Development-only fallback; validate() warns loudly and production
    // deployments must override via RELAYDESK_JWT_SECRET.
    "relaydesk-development-secret-change-me".to_string()
}

fn default_token_expiry() -> u64 {
    1
}

fn default_refresh_expiry() -> u64 {
    7
}

fn default_agent_token_expiry() -> u64 {
    30
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://relaydesk.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Rate limiting configuration
///
/// Budgets are requests per fixed window, scaled by subscription tier.
/// The strict settings cover sensitive single endpoints (credential
/// issuance), which get a smaller budget in an independent window.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_free_budget")]
    pub free: u32,
    #[serde(default = "default_starter_budget")]
    pub starter: u32,
    #[serde(default = "default_professional_budget")]
    pub professional: u32,
    #[serde(default = "default_enterprise_budget")]
    pub enterprise: u32,
    #[serde(default = "default_strict_budget")]
    pub strict_budget: u32,
    #[serde(default = "default_strict_window_secs")]
    pub strict_window_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            free: default_free_budget(),
            starter: default_starter_budget(),
            professional: default_professional_budget(),
            enterprise: default_enterprise_budget(),
            strict_budget: default_strict_budget(),
            strict_window_secs: default_strict_window_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl RateLimitSettings {
    /// Request budget for a subscription tier
    pub fn budget_for(&self, tier: SubscriptionTier) -> u32 {
        match tier {
            SubscriptionTier::Free => self.free,
            SubscriptionTier::Starter => self.starter,
            SubscriptionTier::Professional => self.professional,
            SubscriptionTier::Enterprise => self.enterprise,
        }
    }
}

fn default_window_secs() -> u64 {
    60
}

fn default_free_budget() -> u32 {
    100
}

fn default_starter_budget() -> u32 {
    500
}

fn default_professional_budget() -> u32 {
    1000
}

fn default_enterprise_budget() -> u32 {
    5000
}

fn default_strict_budget() -> u32 {
    10
}

fn default_strict_window_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables (prefixed with RELAYDESK_)
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("RELAYDESK_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = if let Some(ref path) = config_path {
            if path.exists() {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                serde_norway::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file: {:?}", path))?
            } else {
                AppConfig::default()
            }
        } else {
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            PathBuf::from("/etc/relaydesk/config.yaml"),
        ];
        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("RELAYDESK_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("RELAYDESK_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(secret) = std::env::var("RELAYDESK_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Ok(url) = std::env::var("RELAYDESK_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(level) = std::env::var("RELAYDESK_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate the configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 32 {
            bail!("auth.jwt_secret must be at least 32 characters");
        }
        if self.auth.token_expiry_hours == 0 {
            bail!("auth.token_expiry_hours must be greater than zero");
        }
        if self.rate_limit.window_secs == 0 || self.rate_limit.strict_window_secs == 0 {
            bail!("rate_limit windows must be greater than zero");
        }
        if self.rate_limit.strict_budget == 0 {
            bail!("rate_limit.strict_budget must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tier_budgets_scale() {
        let settings = RateLimitSettings::default();
        assert_eq!(settings.budget_for(SubscriptionTier::Free), 100);
        assert_eq!(settings.budget_for(SubscriptionTier::Starter), 500);
        assert_eq!(settings.budget_for(SubscriptionTier::Professional), 1000);
        assert_eq!(settings.budget_for(SubscriptionTier::Enterprise), 5000);
    }

    #[test]
    fn test_yaml_parsing_with_partial_sections() {
        let yaml = r#"
server:
  port: 9090
rate_limit:
  free: 10
"#;
        let config: AppConfig = serde_norway::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.rate_limit.free, 10);
        assert_eq!(config.rate_limit.enterprise, 5000);
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = "short".to_string();
        assert!(config.validate().is_err());
    }
}
