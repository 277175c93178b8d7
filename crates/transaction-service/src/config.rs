//! Transaction-service configuration loaded from environment variables.

use std::time::Duration;

use thiserror::Error;

/// Deployment environment; gates CORS restrictions and secret validation.
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
/// - `PORT` — listener port (default: `3000`)
/// - `DEPLOYMENT_ENV` — `development` | `production` (default: `development`)
/// - `DATABASE_URL` — PostgreSQL connection string (required)
/// - `DB_MAX_CONNECTIONS` — pool size; bounds concurrent sagas (default: `20`)
/// - `JWT_SECRET` — required and at least 32 chars in production
/// - `JWT_EXPIRES_IN_SECS` — token lifetime (default: 24 h)
/// - `NATS_URL` — broker URL (default: `nats://127.0.0.1:4222`)
/// - `SERVICE_NAME` — name stamped on audit envelopes (default: `transaction-service`)
/// - `ALLOWED_ORIGINS` — comma list, honored in production
/// - `AUDIT_ACK_TIMEOUT_MS` — saga acknowledgement budget (default: `10000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub deployment_env: DeploymentEnv,
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub jwt_expires_in: Duration,
    pub nats_url: String,
    pub service_name: String,
    pub allowed_origins: Vec<String>,
    pub audit_ack_timeout: Duration,
}

const DEV_JWT_SECRET: &str = "development-only-jwt-secret-0123456789abcdef";

impl Config {
    /// Loads and validates configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let deployment_env = match std::env::var("DEPLOYMENT_ENV") {
            Ok(value) => value.parse().map_err(|reason| ConfigError::Invalid {
                key: "DEPLOYMENT_ENV",
                reason,
            })?,
            Err(_) => DeploymentEnv::default(),
        };

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::Missing { key: "DATABASE_URL" })?;

        let jwt_secret = match std::env::var("JWT_SECRET") {
            Ok(secret) => secret,
            Err(_) if deployment_env == DeploymentEnv::Development => DEV_JWT_SECRET.to_string(),
            Err(_) => return Err(ConfigError::Missing { key: "JWT_SECRET" }),
        };

        let config = Self {
            port: parse_env("PORT", 3000)?,
            deployment_env,
            database_url,
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", 20)?,
            jwt_secret,
            jwt_expires_in: Duration::from_secs(parse_env("JWT_EXPIRES_IN_SECS", 86_400)?),
            nats_url: std::env::var("NATS_URL")
                .unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string()),
            service_name: std::env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "transaction-service".to_string()),
            allowed_origins: parse_origins(std::env::var("ALLOWED_ORIGINS").ok().as_deref()),
            audit_ack_timeout: Duration::from_millis(parse_env("AUDIT_ACK_TIMEOUT_MS", 10_000)?),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.deployment_env == DeploymentEnv::Production && self.jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                key: "JWT_SECRET",
                reason: "must be at least 32 characters in production".to_string(),
            });
        }
        Ok(())
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
