//! Configuration for context budgeting
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML/JSON
//! file, then `CONTEXT_BUDGET__<SECTION>__<FIELD>` environment variables,
//! then `CONTEXT_MAX_CAPACITY` / `CONTEXT_RESPONSE_RESERVE`.

use crate::context::{BudgetConfig, EstimatorConfig, TruncationPolicy};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

const ENV_PREFIX: &str = "CONTEXT_BUDGET";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub truncation: TruncationPolicy,

    #[serde(default)]
    pub estimator: EstimatorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load from a file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut config: Config = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        config.budget = config.budget.from_env();
        Ok(config)
    }

    /// Load from `.env` and the process environment only
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config: Config = ::config::Config::builder()
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        config.budget = config.budget.from_env();
        Ok(config)
    }

    /// Validate budget and truncation settings
    pub fn validate(&self) -> Result<()> {
        self.budget.validate()?;
        self.truncation.validate()?;
        Ok(())
    }
}

fn environment() -> ::config::Environment {
    ::config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

/// Serializes tests that read or mutate process environment variables
#[cfg(test)]
pub(crate) fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}
