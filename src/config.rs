//! # Unit of Work Configuration
//!
//! Settings applied to every unit of work a
//! [`UnitOfWorkFactory`](crate::unit_of_work::UnitOfWorkFactory) opens.
//!
//! ## Sources
//!
//! Later sources override earlier ones:
//! 1. [`Default`]
//! 2. A TOML document ([`UnitOfWorkConfig::from_toml_str`] or
//!    [`UnitOfWorkConfig::from_file`])
//! 3. Environment variables ([`UnitOfWorkConfig::with_env_overrides`])
//!
//! ```toml
//! raise_on_not_found = true
//! wait_timeout_ms = 1500
//! # read_only = true   # omit to take it from the query plan
//! ```
//!
//! ## Environment
//!
//! | Variable | Field |
//! |---|---|
//! | `SHOP_UOW_RAISE_ON_NOT_FOUND` | `raise_on_not_found` (`true`/`false`) |
//! | `SHOP_UOW_WAIT_TIMEOUT_MS` | `wait_timeout_ms` (milliseconds) |

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_RAISE_ON_NOT_FOUND: &str = "SHOP_UOW_RAISE_ON_NOT_FOUND";
pub const ENV_WAIT_TIMEOUT_MS: &str = "SHOP_UOW_WAIT_TIMEOUT_MS";

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnitOfWorkConfig {
    /// Forces the unit of work's mode. `None` takes it from the plan.
    pub read_only: Option<bool>,
    /// Fail a load whose exact-id lookup comes back short.
    pub raise_on_not_found: bool,
    /// How long a blocking lock request may wait, in milliseconds.
    pub wait_timeout_ms: u64,
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            read_only: None,
            raise_on_not_found: true,
            wait_timeout_ms: 1500,
        }
    }
}

impl UnitOfWorkConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Applies `SHOP_UOW_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup, keyed by variable name.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_RAISE_ON_NOT_FOUND) {
            self.raise_on_not_found = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: ENV_RAISE_ON_NOT_FOUND,
                        value,
                    })
                }
            };
        }
        if let Some(value) = lookup(ENV_WAIT_TIMEOUT_MS) {
            self.wait_timeout_ms = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_WAIT_TIMEOUT_MS,
                value: value.clone(),
            })?;
        }
        Ok(self)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn raise_on_not_found(mut self, raise: bool) -> Self {
        self.raise_on_not_found = raise;
        self
    }
}
