//! Context budgeting for LLM transcripts
//!
//! Estimates how many capacity units a transcript of role-tagged turns will
//! consume and trims it to fit a model's context window before it is sent.
//!
//! ```
//! use context_budget::context::{BudgetConfig, TranscriptBudgeter, Turn};
//!
//! let budgeter = TranscriptBudgeter::default();
//! let turns = vec![Turn::system("You are a retail agent."), Turn::user("Where is my order?")];
//! let fitted = budgeter.fit(&turns, &BudgetConfig::default(), None);
//! assert_eq!(fitted, turns);
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;

pub use context::{BudgetConfig, FitOutcome, FitStage, TranscriptBudgeter, Turn};
pub use error::{ContextError, Result};
