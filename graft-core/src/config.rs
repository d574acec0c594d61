use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use sqlx::sqlite::SqliteConnectOptions;

use crate::error::{GraftError, GraftResult};

pub const DEFAULT_URL: &str = "sqlite::memory:";

/// Which database the engine talks to and how the connection is opened.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GraftConfig {
    /// sqlx SQLite URL, e.g. `sqlite://school.db` or `sqlite::memory:`.
    pub url: String,
    pub create_if_missing: bool,
    pub busy_timeout_ms: u64,
}

impl Default for GraftConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_owned(),
            create_if_missing: true,
            busy_timeout_ms: 5_000,
        }
    }
}

impl GraftConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Reads `GRAFT_DATABASE_URL` and `GRAFT_BUSY_TIMEOUT_MS`, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> GraftResult<Self> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("GRAFT_DATABASE_URL") {
            config.url = url;
        }
        if let Ok(raw) = std::env::var("GRAFT_BUSY_TIMEOUT_MS") {
            config.busy_timeout_ms = raw.parse().map_err(|_| {
                GraftError::Config(format!("GRAFT_BUSY_TIMEOUT_MS is not a number: {}", raw))
            })?;
        }
        Ok(config)
    }

    pub fn from_json(raw: &str) -> GraftResult<Self> {
        serde_json::from_str(raw).map_err(|err| GraftError::Config(err.to_string()))
    }

    pub(crate) fn connect_options(&self) -> GraftResult<SqliteConnectOptions> {
        if !self.url.starts_with("sqlite:") {
            return Err(GraftError::Config(format!("not a sqlite url: {}", self.url)));
        }
        let options = SqliteConnectOptions::from_str(&self.url)
            .map_err(|err| GraftError::Config(format!("invalid url {}: {}", self.url, err)))?;
        Ok(options
            .create_if_missing(self.create_if_missing)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(self.busy_timeout_ms)))
    }
}
