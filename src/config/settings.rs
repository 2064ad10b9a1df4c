//! Process settings from the environment (and `.env` via dotenvy).

use crate::error::ConfigError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Deployment environment; decides how much error detail reaches clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    /// From `APP_ENV`; anything unset or unrecognized is production.
    pub fn from_env() -> Self {
        std::env::var("APP_ENV")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Environment::Production)
    }

    pub fn is_development(self) -> bool {
        matches!(self, Environment::Development)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ConfigError::Env {
                var: "APP_ENV",
                message: format!("unknown environment '{}'", other),
            }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    /// Schema used for descriptors that do not name one.
    pub schema: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            url: "postgres://localhost/strata".into(),
            max_connections: 10,
            idle_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            schema: "public".into(),
        }
    }
}

impl DatabaseSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = DatabaseSettings::default();
        Ok(DatabaseSettings {
            url: std::env::var("DATABASE_URL").unwrap_or(defaults.url),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            idle_timeout: env_parse("DATABASE_IDLE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            connect_timeout: env_parse("DATABASE_CONNECT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            schema: std::env::var("DATABASE_SCHEMA").unwrap_or(defaults.schema),
        })
    }

    /// Bounded pool; the only shared mutable resource.
    pub async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        tracing::info!(
            max_connections = self.max_connections,
            idle_timeout_secs = self.idle_timeout.as_secs(),
            connect_timeout_secs = self.connect_timeout.as_secs(),
            "connecting database pool"
        );
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .idle_timeout(self.idle_timeout)
            .acquire_timeout(self.connect_timeout)
            .connect(&self.url)
            .await
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub environment: Environment,
    pub database: DatabaseSettings,
    /// `TRUST_USER_HEADER`; off unless a gateway owns `X-User-ID`.
    pub trust_user_header: bool,
}

impl Settings {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let environment = match std::env::var("APP_ENV") {
            Ok(v) => v.parse()?,
            Err(_) => Environment::Production,
        };
        Ok(Settings {
            environment,
            database: DatabaseSettings::from_env()?,
            trust_user_header: env_parse("TRUST_USER_HEADER")?.unwrap_or(false),
        })
    }
}

fn env_parse<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Env {
                var,
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_names() {
        assert_eq!("Development".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!(" test ".parse::<Environment>().unwrap(), Environment::Test);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn database_defaults() {
        let d = DatabaseSettings::default();
        assert_eq!(d.max_connections, 10);
        assert_eq!(d.idle_timeout, Duration::from_secs(30));
        assert_eq!(d.schema, "public");
    }
}
