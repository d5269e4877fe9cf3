//! Transcript budgeting
//!
//! This module sizes role-tagged transcripts in approximate capacity units
//! and trims them to fit a model's context window, keeping the system
//! instructions and the most recent exchange.

pub mod models;
pub mod token_budget;
pub mod token_estimator;
pub mod transcript_budgeter;

pub use models::{FunctionCall, Role, ToolCall, ToolSchemaPayload, Turn};
pub use token_budget::{BudgetConfig, BudgetError, TruncationPolicy, TRUNCATION_MARKER};
pub use token_estimator::{
    build_estimator, CharRatioEstimator, EstimatorConfig, EstimatorKind, TiktokenEstimator,
    TokenEstimator,
};
pub use transcript_budgeter::{FitOutcome, FitStage, TranscriptBudgeter};
