//! Settings - database URLs and pool tuning
//!
//! Loaded from environment variables (after an optional `.env` file):
//! - `DATABASE_URL`: runtime connection URL (default: `sqlite://./default.db`)
//! - `MIGRATION_DATABASE_URL`: URL for schema tooling; falls back to
//!   `ALEMBIC_DATABASE_URL`, then to `DATABASE_URL`
//! - `ECHO_SQL`: log every statement at info level (`true`/`1`/`yes`)
//! - `DB_MAX_CONNECTIONS`: pool size (default: 5)

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{OrmError, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://./default.db";

/// Kept low; one session holds one connection for its whole lifetime.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_url: String,
    pub migration_database_url: String,
    pub echo_sql: bool,
    pub max_connections: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_owned(),
            migration_database_url: DEFAULT_DATABASE_URL.to_owned(),
            echo_sql: false,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Load `.env` from the current directory if present. Existing variables win.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => info!("Loaded configuration from {}", path.display()),
        Err(e) if e.not_found() => debug!("No .env file found; using environment only"),
        Err(e) => debug!("Failed to load .env: {}", e),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl Settings {
    /// Settings from the process environment, after loading `.env`.
    pub fn from_env() -> Result<Self> {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Settings from any key lookup; `from_env` with the environment swapped
    /// out, for tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned());
        let migration_database_url = lookup("MIGRATION_DATABASE_URL")
            .or_else(|| lookup("ALEMBIC_DATABASE_URL"))
            .unwrap_or_else(|| database_url.clone());
        let echo_sql = match lookup("ECHO_SQL") {
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| OrmError::config(format!("ECHO_SQL: not a boolean: {raw:?}")))?,
            None => false,
        };
        let max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| {
                OrmError::config(format!("DB_MAX_CONNECTIONS: {e}: {raw:?}"))
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        Self {
            database_url,
            migration_database_url,
            echo_sql,
            max_connections,
        }
        .validated()
    }

    /// Settings from a TOML file using the same keys in lowercase.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| OrmError::config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(default)]
        struct Partial {
            database_url: Option<String>,
            migration_database_url: Option<String>,
            echo_sql: bool,
            max_connections: u32,
        }

        impl Default for Partial {
            fn default() -> Self {
                Self {
                    database_url: None,
                    migration_database_url: None,
                    echo_sql: false,
                    max_connections: DEFAULT_MAX_CONNECTIONS,
                }
            }
        }

        let partial: Partial =
            toml::from_str(raw).map_err(|e| OrmError::config(e.to_string()))?;
        let database_url = partial
            .database_url
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned());
        Self {
            migration_database_url: partial
                .migration_database_url
                .unwrap_or_else(|| database_url.clone()),
            database_url,
            echo_sql: partial.echo_sql,
            max_connections: partial.max_connections,
        }
        .validated()
    }

    /// Settings for an explicit URL with everything else defaulted.
    pub fn with_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            migration_database_url: url.clone(),
            database_url: url,
            ..Self::default()
        }
    }

    fn validated(self) -> Result<Self> {
        for url in [&self.database_url, &self.migration_database_url] {
            if !url.starts_with("sqlite:") {
                return Err(OrmError::config(format!(
                    "unsupported database url {url:?}; only sqlite: urls are supported"
                )));
            }
        }
        if self.max_connections == 0 {
            return Err(OrmError::config("max_connections must be at least 1"));
        }
        Ok(self)
    }
}
