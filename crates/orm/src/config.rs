//! Router, pool and health configuration
//!
//! Loaded from the environment with [`DatabaseConfig::from_env`] or built in
//! code; both paths go through [`DatabaseConfig::validate`].

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::backends::{DatabaseBackendType, DatabasePoolConfig};
use crate::connection::{HealthMonitorConfig, ReadPreference, RouterConfig};
use crate::error::OrmError;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl From<ConfigError> for OrmError {
    fn from(err: ConfigError) -> Self {
        OrmError::Configuration(err.to_string())
    }
}

/// Where a configuration value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value loaded from environment variable
    EnvVar(String),
    /// Default value used
    Default(String),
}

impl ConfigSource {
    pub fn is_env_var(&self) -> bool {
        matches!(self, ConfigSource::EnvVar(_))
    }
}

/// Everything needed to build a [`ConnectionRouter`](crate::connection::ConnectionRouter)
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub write_url: String,
    pub read_url: Option<String>,
    pub router: RouterConfig,
    pub pool: DatabasePoolConfig,
    pub health: HealthMonitorConfig,
}

// (field, variable, default shown by config_sources)
const SOURCES: &[(&str, &str, &str)] = &[
    ("write_url", "DATABASE_URL", "required"),
    ("read_url", "DATABASE_READ_URL", "none"),
    ("split_enabled", "DB_SPLIT_ENABLED", "false"),
    ("read_preference", "DB_READ_PREFERENCE", "replica"),
    ("transaction_forces_write", "DB_TRANSACTION_FORCES_WRITE", "true"),
    ("retry_writes", "DB_RETRY_WRITES", "true"),
    ("max_retries", "DB_MAX_RETRIES", "3"),
    ("max_connections", "DB_MAX_CONNECTIONS", "10"),
    ("check_interval", "DB_HEALTH_CHECK_INTERVAL_SECS", "30"),
    ("probe_timeout", "DB_HEALTH_PROBE_TIMEOUT_MS", "5000"),
    ("degraded_threshold", "DB_HEALTH_DEGRADED_MS", "1000"),
    ("failure_threshold", "DB_HEALTH_FAILURE_THRESHOLD", "3"),
];

impl DatabaseConfig {
    /// Single-pool configuration with defaults everywhere else
    pub fn new(write_url: impl Into<String>) -> Self {
        Self {
            write_url: write_url.into(),
            read_url: None,
            router: RouterConfig::default(),
            pool: DatabasePoolConfig::default(),
            health: HealthMonitorConfig::default(),
        }
    }

    /// Add a replica and enable the read/write split
    pub fn with_read_url(mut self, read_url: impl Into<String>) -> Self {
        self.read_url = Some(read_url.into());
        self.router.split_enabled = true;
        self
    }

    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }

    pub fn with_pool(mut self, pool: DatabasePoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_health(mut self, health: HealthMonitorConfig) -> Self {
        self.health = health;
        self
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let write_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingRequired {
            field: "write_url".to_string(),
            hint: "Set DATABASE_URL to the primary database URL".to_string(),
        })?;

        let mut config = Self::new(write_url);
        config.read_url = env::var("DATABASE_READ_URL").ok().filter(|url| !url.is_empty());

        // A replica URL alone turns the split on unless DB_SPLIT_ENABLED says otherwise
        config.router.split_enabled = match parse_bool("split_enabled", "DB_SPLIT_ENABLED")? {
            Some(enabled) => enabled,
            None => config.read_url.is_some(),
        };

        if let Ok(value) = env::var("DB_READ_PREFERENCE") {
            config.router.read_preference =
                value.parse::<ReadPreference>().map_err(|_| ConfigError::InvalidValue {
                    field: "read_preference".to_string(),
                    value: value.clone(),
                    expected: "replica or primary".to_string(),
                })?;
        }
        if let Some(value) = parse_bool("transaction_forces_write", "DB_TRANSACTION_FORCES_WRITE")? {
            config.router.transaction_forces_write = value;
        }
        if let Some(value) = parse_bool("retry_writes", "DB_RETRY_WRITES")? {
            config.router.retry_writes = value;
        }
        if let Some(value) = parse_var::<u32>("max_retries", "DB_MAX_RETRIES", "non-negative integer")? {
            config.router.max_retries = value;
        }
        if let Some(value) =
            parse_var::<u32>("max_connections", "DB_MAX_CONNECTIONS", "positive integer")?
        {
            config.pool.max_connections = value;
        }
        if let Some(secs) = parse_var::<u64>(
            "check_interval",
            "DB_HEALTH_CHECK_INTERVAL_SECS",
            "interval in seconds",
        )? {
            config.health.check_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(
            "probe_timeout",
            "DB_HEALTH_PROBE_TIMEOUT_MS",
            "timeout in milliseconds",
        )? {
            config.health.probe_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(
            "degraded_threshold",
            "DB_HEALTH_DEGRADED_MS",
            "latency in milliseconds",
        )? {
            config.health.degraded_threshold = Duration::from_millis(ms);
        }
        if let Some(value) = parse_var::<u32>(
            "failure_threshold",
            "DB_HEALTH_FAILURE_THRESHOLD",
            "positive integer",
        )? {
            config.health.failure_threshold = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("write_url", &self.write_url)?;
        if let Some(read_url) = &self.read_url {
            validate_url("read_url", read_url)?;
        }

        if self.pool.max_connections == 0 {
            return Err(invalid("max_connections", "0", "at least 1 connection"));
        }
        if self.pool.min_connections > self.pool.max_connections {
            return Err(invalid(
                "min_connections",
                &self.pool.min_connections.to_string(),
                "no more than max_connections",
            ));
        }
        if self.health.failure_threshold == 0 {
            return Err(invalid("failure_threshold", "0", "at least 1 failure"));
        }
        if self.health.check_interval.is_zero() {
            return Err(invalid("check_interval", "0", "a non-zero interval"));
        }
        if self.health.probe_timeout.is_zero() {
            return Err(invalid("probe_timeout", "0", "a non-zero timeout"));
        }
        Ok(())
    }

    /// Get configuration source information for debugging
    pub fn config_sources(&self) -> HashMap<String, ConfigSource> {
        SOURCES
            .iter()
            .map(|(field, var, default)| {
                let source = if env::var(var).is_ok() {
                    ConfigSource::EnvVar(var.to_string())
                } else {
                    ConfigSource::Default(default.to_string())
                };
                (field.to_string(), source)
            })
            .collect()
    }
}

fn invalid(field: &str, value: &str, expected: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    }
}

fn validate_url(field: &str, url: &str) -> Result<(), ConfigError> {
    DatabaseBackendType::from_url(url)
        .map(|_| ())
        .map_err(|_| invalid(field, &crate::backends::redact_url(url), "postgres://, postgresql:// or memory:// URL"))
}

fn parse_var<T: FromStr>(field: &str, var: &str, expected: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(field, &value, expected)),
        Err(_) => Ok(None),
    }
}

fn parse_bool(field: &str, var: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(var) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(invalid(field, &value, "true or false")),
        },
        Err(_) => Ok(None),
    }
}
