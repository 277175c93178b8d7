//! Audit-service configuration loaded from environment variables.

use thiserror::Error;

/// Deployment environment; gates CORS restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentEnv {
    #[default]
    Development,
    Production,
}

impl std::str::FromStr for DeploymentEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(DeploymentEnv::Development),
            "production" => Ok(DeploymentEnv::Production),
            other => Err(format!("expected 'development' or 'production', got '{other}'")),
        }
    }
}

/// Configuration errors name the offending key.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} is required")]
    Missing { key: &'static str },

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Recognized environment keys:
/// - `PORT` — listener port (default: `3001`)
/// - `DEPLOYMENT_ENV` — `development` | `production` (default: `development`)
/// - `DATABASE_URL` — PostgreSQL connection string (required)
/// - `DB_MAX_CONNECTIONS` — pool size (default: `20`)
/// - `NATS_URL` — broker URL (default: `nats://127.0.0.1:4222`)
/// - `SERVICE_NAME` — (default: `audit-service`)
/// - `ALLOWED_ORIGINS` — comma list, honored in production
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub deployment_env: DeploymentEnv,
    pub database_url: String,
    pub db_max_connections: u32,
    pub nats_url: String,
    pub service_name: String,
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Loads configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let deployment_env = match std::env::var("DEPLOYMENT_ENV") {
            Ok(value) => value.parse().map_err(|reason| ConfigError::Invalid {
                key: "DEPLOYMENT_ENV",
                reason,
            })?,
            Err(_) => DeploymentEnv::default(),
        };

        Ok(Self {
            port: parse_env("PORT", 3001)?,
            deployment_env,
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing { key: "DATABASE_URL" })?,
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", 20)?,
            nats_url: std::env::var("NATS_URL")
                .unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string()),
            service_name: std::env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "audit-service".to_string()),
            allowed_origins: parse_origins(std::env::var("ALLOWED_ORIGINS").ok().as_deref()),
        })
    }

    /// The `"0.0.0.0:port"` bind address.
    pub fn addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_origins(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
