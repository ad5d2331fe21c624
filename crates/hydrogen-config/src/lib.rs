//! Startup configuration for the Hydrogen core.
//!
//! Loaded once at process start into the process-wide [`AppConfig`], one of
//! the only pieces of global mutable-at-init state. There is no hot reload;
//! changing configuration means restarting the process.

use std::collections::HashMap;
use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use hydrogen_errors::{Error, Result};

/// The four dialects Hydrogen speaks. No others are in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    Postgresql,
    Mysql,
    Sqlite,
    Db2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_pool_size")]
    pub max_size: u32,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_idle_health_check_secs")]
    pub idle_health_check_secs: u64,
}

fn default_pool_size() -> u32 {
    10
}
fn default_acquire_timeout_ms() -> u64 {
    5_000
}
fn default_idle_health_check_secs() -> u64 {
    30
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_pool_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            idle_health_check_secs: default_idle_health_check_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub engine: EngineType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub schema: Option<String>,
    /// `PAYLOAD:<name>` or `PATH:<dir>`, see the migration engine's discovery rules.
    pub migrations: Option<String>,
    #[serde(default)]
    pub test_migration: bool,
    #[serde(default)]
    pub auto_migration: bool,
    #[serde(default)]
    pub pool: PoolConfig,
    /// Connection parameters (host/port/user/etc.), kept as a free-form map
    /// since each dialect wants different keys.
    #[serde(default)]
    pub connection_params: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub hmac_secret: String,
    #[serde(default = "default_jwt_lifetime")]
    pub jwt_lifetime_seconds: u64,
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_jwt_lifetime() -> u64 {
    3600
}
fn default_rate_limit_window() -> u64 {
    900
}
fn default_max_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Loads configuration from a TOML file, then overlays recognized
    /// environment variables (`HYDROGEN_DEMO_*`, `ACURANZO_DB_*`,
    /// `CANVAS_DB_*`, `BIGBLUE_DB_*`).
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::internal(format!("reading config {}: {e}", path.display())))?;
        let mut config: AppConfig = toml::from_str(&text)
            .map_err(|e| Error::invalid_input(format!("parsing config {}: {e}", path.display())))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Overlays the per-engine environment prefixes onto already-loaded
    /// database connection params, matching the demo deployment layer's
    /// recognized variables.
    pub fn apply_env_overrides(&mut self) {
        for db in &mut self.databases {
            let prefix = match db.name.as_str() {
                "Acuranzo" => "ACURANZO_DB_",
                "Canvas" => "CANVAS_DB_",
                "BigBlue" => "BIGBLUE_DB_",
                _ => continue,
            };
            for key in ["HOST", "PORT", "USER", "PASSWORD", "NAME"] {
                if let Ok(value) = env::var(format!("{prefix}{key}")) {
                    db.connection_params.insert(key.to_lowercase(), value);
                }
            }
        }

        if let Ok(secret) = env::var("HYDROGEN_AUTH_HMAC_SECRET") {
            self.auth.hmac_secret = secret;
        }
    }

    pub fn database(&self, name: &str) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|d| d.name == name)
    }
}

/// Demo-layer environment variables recognized on top of `AppConfig`,
/// consulted by the thin server shell to seed demo accounts — not part of
/// the core's own config surface.
#[derive(Debug, Clone)]
pub struct DemoEnv {
    pub admin_name: Option<String>,
    pub admin_pass: Option<String>,
    pub user_name: Option<String>,
    pub user_pass: Option<String>,
    pub email: Option<String>,
    pub api_key: Option<String>,
}

impl DemoEnv {
    pub fn from_env() -> Self {
        Self {
            admin_name: env::var("HYDROGEN_DEMO_ADMIN_NAME").ok(),
            admin_pass: env::var("HYDROGEN_DEMO_ADMIN_PASS").ok(),
            user_name: env::var("HYDROGEN_DEMO_USER_NAME").ok(),
            user_pass: env::var("HYDROGEN_DEMO_USER_PASS").ok(),
            email: env::var("HYDROGEN_DEMO_EMAIL").ok(),
            api_key: env::var("HYDROGEN_DEMO_API_KEY").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            [auth]
            hmac_secret = "k"

            [[databases]]
            name = "Acuranzo"
            type = "postgresql"
            migrations = "PAYLOAD:acuranzo"
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.auth.jwt_lifetime_seconds, 3600);
        assert_eq!(config.auth.rate_limit_window, 900);
        assert_eq!(config.auth.max_attempts, 5);
        assert_eq!(config.databases.len(), 1);
        assert_eq!(config.databases[0].pool.max_size, 10);
        assert!(config.databases[0].enabled);
    }

    #[test]
    fn env_overrides_only_apply_to_recognized_names() {
        std::env::set_var("ACURANZO_DB_HOST", "db.internal");
        let mut config = AppConfig {
            databases: vec![DatabaseConfig {
                name: "Acuranzo".into(),
                engine: EngineType::Postgresql,
                enabled: true,
                schema: None,
                migrations: None,
                test_migration: false,
                auto_migration: false,
                pool: PoolConfig::default(),
                connection_params: HashMap::new(),
            }],
            auth: AuthConfig {
                hmac_secret: "k".into(),
                jwt_lifetime_seconds: 3600,
                rate_limit_window: 900,
                max_attempts: 5,
            },
        };
        config.apply_env_overrides();
        assert_eq!(
            config.databases[0].connection_params.get("host"),
            Some(&"db.internal".to_string())
        );
        std::env::remove_var("ACURANZO_DB_HOST");
    }
}
