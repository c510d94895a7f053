//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Deployment environment (`development`, `production`, ...).
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration.
    #[serde(default)]
    pub redis: RedisConfig,
    /// Reconciliation job configuration.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Operator access configuration.
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Seconds to wait when opening a connection.
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Seconds to wait for a pooled connection.
    #[serde(default = "default_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

/// Redis configuration.
///
/// Redis is optional; without it the run lock is process-local.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Reconciliation job configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    /// Whether the recurring schedule is active. Manual runs work either way.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Days an account stays deactivated before it is permanently locked.
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: u32,
    /// Seconds between scheduled runs.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Maximum accounts in flight at once. 1 keeps the run sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Expiry of the distributed run lock, in seconds. Must exceed the longest run.
    #[serde(default = "default_run_lock_ttl_secs")]
    pub run_lock_ttl_secs: u64,
    /// Number of run summaries kept for the operator surface.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grace_period_days: default_grace_period_days(),
            interval_secs: default_interval_secs(),
            concurrency: default_concurrency(),
            run_lock_ttl_secs: default_run_lock_ttl_secs(),
            history_size: default_history_size(),
        }
    }
}

impl ReconciliationConfig {
    /// Grace period as a chrono duration.
    #[must_use]
    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.grace_period_days))
    }

    /// Interval between scheduled runs.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Operator access configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Bearer token required by the admin endpoints.
    #[serde(default)]
    pub token: Option<String>,
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_min_connections() -> u32 {
    1
}

const fn default_timeout_secs() -> u64 {
    10
}

fn default_redis_prefix() -> String {
    "lapse".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_grace_period_days() -> u32 {
    30
}

const fn default_interval_secs() -> u64 {
    86_400
}

const fn default_concurrency() -> usize {
    1
}

const fn default_run_lock_ttl_secs() -> u64 {
    3600
}

const fn default_history_size() -> usize {
    20
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `LAPSE_ENV`)
    /// 4. Environment variables with `LAPSE__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let env = std::env::var("LAPSE_ENV").unwrap_or_else(|_| default_environment());

        let config = config::Config::builder()
            .set_default("environment", env.clone())?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("LAPSE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("LAPSE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Whether this is a development deployment.
    #[must_use]
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }
}
