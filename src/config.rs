// =============================================================================
// AppConfig — per-environment YAML configuration
// =============================================================================
//
// One file per environment under `configs/` (`config.dev.yaml`,
// `config.prod.yaml`, ...), selected by `APP_ENV`. Every field carries a
// serde default so that older files missing new keys still deserialise.
// `PORT` overrides the listen port at startup.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_port() -> u16 {
    8080
}

fn default_sqlite_path() -> String {
    "data/goldlock.db".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_access_minutes() -> i64 {
    30
}

fn default_refresh_hours() -> i64 {
    168
}

fn default_upstream_url() -> String {
    "wss://push143.jtd9999.vip/ws".to_string()
}

// =============================================================================
// Database
// =============================================================================

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[default]
    Sqlite,
    Mysql,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    #[serde(default = "default_sqlite_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysqlConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: default_mysql_port(),
            user: String::new(),
            password: String::new(),
            database: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub kind: DatabaseKind,
    #[serde(default)]
    pub sqlite: SqliteConfig,
    #[serde(default)]
    pub mysql: MysqlConfig,
}

impl DatabaseConfig {
    /// Connection URL for the sqlx Any driver.
    pub fn url(&self) -> String {
        match self.kind {
            DatabaseKind::Sqlite => format!("sqlite://{}?mode=rwc", self.sqlite.path),
            DatabaseKind::Mysql => format!(
                "mysql://{}:{}@{}:{}/{}",
                self.mysql.user,
                self.mysql.password,
                self.mysql.host,
                self.mysql.port,
                self.mysql.database
            ),
        }
    }
}

// =============================================================================
// Auth / quote sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_access_minutes")]
    pub access_minutes: i64,
    #[serde(default = "default_refresh_hours")]
    pub refresh_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_minutes: default_access_minutes(),
            refresh_hours: default_refresh_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteConfig {
    /// Upstream quote feed endpoint.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            upstream_url: default_upstream_url(),
        }
    }
}

// =============================================================================
// AppConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub quote: QuoteConfig,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            quote: QuoteConfig::default(),
            port: default_port(),
        }
    }
}

/// Environment name from `APP_ENV`, lowercased; `dev` when unset.
pub fn app_env() -> String {
    std::env::var("APP_ENV")
        .map(|v| v.to_lowercase())
        .unwrap_or_else(|_| "dev".to_string())
}

impl AppConfig {
    /// Load `configs/config.{env}.yaml`.
    pub fn load(env: &str) -> Result<Self> {
        let path = format!("configs/config.{env}.yaml");
        Self::load_from(&path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(path = %path.display(), kind = ?config.database.kind, "config loaded");
        Ok(config)
    }

    /// Listen address, honoring the `PORT` environment override.
    pub fn listen_addr(&self) -> String {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(self.port);
        format!("0.0.0.0:{port}")
    }
}

// =============================================================================
// Tests
// =============================================================================
