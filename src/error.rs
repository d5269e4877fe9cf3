//! Error types for context-budget

use thiserror::Error;

use crate::context::BudgetError;

/// Result type alias
pub type Result<T> = std::result::Result<T, ContextError>;

/// Errors raised outside the fitting path (config, I/O, estimator setup)
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Budget error: {0}")]
    Budget(#[from] BudgetError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Estimator initialization failed: {0}")]
    Estimator(String),
}

impl From<::config::ConfigError> for ContextError {
    fn from(err: ::config::ConfigError) -> Self {
        ContextError::Configuration(err.to_string())
    }
}
