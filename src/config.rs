//! Runtime configuration parsed from environment variables.

use crate::feed::memory::DEFAULT_FEED_BUFFER;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5173";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub base_url: String,
    pub feed_buffer: usize,
}

impl Config {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `DATABASE_URL`: required only by the `PostgreSQL` adapter
    /// - `DB_MAX_CONNECTIONS`: default 5
    /// - `BACHECA_BASE_URL`: join-link base, default `http://localhost:5173`
    /// - `BACHECA_FEED_BUFFER`: events buffered per subscription, default 256
    ///
    /// Unparseable numbers fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());
        let base_url = std::env::var("BACHECA_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();

        Self {
            database_url,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS).max(1),
            base_url,
            feed_buffer: match env_parse("BACHECA_FEED_BUFFER", DEFAULT_FEED_BUFFER) {
                0 => DEFAULT_FEED_BUFFER,
                n => n,
            },
        }
    }

    /// # Errors
    ///
    /// Returns `ConfigError::MissingVar` when `DATABASE_URL` is unset.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingVar("DATABASE_URL"))
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
