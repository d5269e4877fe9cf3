//! Capacity limits and truncation policy
//!
//! A request has `max_capacity` units in total. `response_reserve` units are
//! held back for the model's output, and the tool schema (if any) is paid for
//! before the transcript gets what is left.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default max context length for the deployed model
pub const DEFAULT_MAX_CAPACITY: usize = 4096;

/// Default units reserved for the model's response
pub const DEFAULT_RESPONSE_RESERVE: usize = 1024;

/// Marker appended to capped content
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Budget configuration for a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_max_capacity")]
    pub max_capacity: usize,
    #[serde(default = "default_response_reserve")]
    pub response_reserve: usize,
}

fn default_max_capacity() -> usize {
    DEFAULT_MAX_CAPACITY
}

fn default_response_reserve() -> usize {
    DEFAULT_RESPONSE_RESERVE
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
            response_reserve: default_response_reserve(),
        }
    }
}

impl BudgetConfig {
    pub fn new(max_capacity: usize, response_reserve: usize) -> Self {
        Self {
            max_capacity,
            response_reserve,
        }
    }

    /// Validate that the reserve leaves room for a prompt
    pub fn validate(&self) -> Result<(), BudgetError> {
        if self.response_reserve >= self.max_capacity {
            return Err(BudgetError::ReserveExceedsCapacity {
                reserve: self.response_reserve,
                max: self.max_capacity,
            });
        }
        Ok(())
    }

    /// Units left for the prompt after the response reserve
    pub fn prompt_budget(&self) -> i64 {
        self.max_capacity as i64 - self.response_reserve as i64
    }

    /// Units left for the transcript once the tool schema is paid for.
    ///
    /// May be zero or negative.
    pub fn available(&self, tool_schema_units: usize) -> i64 {
        self.prompt_budget() - tool_schema_units as i64
    }

    /// Load overrides from environment variables
    pub fn from_env(mut self) -> Self {
        if let Ok(val) = std::env::var("CONTEXT_MAX_CAPACITY") {
            if let Ok(max) = val.parse() {
                self.max_capacity = max;
            }
        }

        if let Ok(val) = std::env::var("CONTEXT_RESPONSE_RESERVE") {
            if let Ok(reserve) = val.parse() {
                self.response_reserve = reserve;
            }
        }

        self
    }
}

/// Character ceilings applied at each escalation level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationPolicy {
    /// First-pass ceiling for system turns
    #[serde(default = "default_system_ceiling")]
    pub system_ceiling: usize,

    /// First-pass ceiling for every other turn
    #[serde(default = "default_conversation_ceiling")]
    pub conversation_ceiling: usize,

    /// Ceiling for the last two conversation turns when eviction bottoms out
    #[serde(default = "default_aggressive_ceiling")]
    pub aggressive_ceiling: usize,

    /// Ceiling for every turn in the final safety pass
    #[serde(default = "default_final_ceiling")]
    pub final_ceiling: usize,

    /// Characters kept per available unit when shrinking an oversized system turn
    #[serde(default = "default_shrink_chars_per_unit")]
    pub shrink_chars_per_unit: usize,

    #[serde(default = "default_marker")]
    pub marker: String,
}

fn default_system_ceiling() -> usize {
    4000
}

fn default_conversation_ceiling() -> usize {
    3000
}

fn default_aggressive_ceiling() -> usize {
    500
}

fn default_final_ceiling() -> usize {
    300
}

fn default_shrink_chars_per_unit() -> usize {
    3
}

fn default_marker() -> String {
    TRUNCATION_MARKER.to_string()
}

impl Default for TruncationPolicy {
    fn default() -> Self {
        Self {
            system_ceiling: default_system_ceiling(),
            conversation_ceiling: default_conversation_ceiling(),
            aggressive_ceiling: default_aggressive_ceiling(),
            final_ceiling: default_final_ceiling(),
            shrink_chars_per_unit: default_shrink_chars_per_unit(),
            marker: default_marker(),
        }
    }
}

impl TruncationPolicy {
    /// Ceilings must tighten at each escalation level
    pub fn validate(&self) -> Result<(), BudgetError> {
        let ordered = self.final_ceiling <= self.aggressive_ceiling
            && self.aggressive_ceiling <= self.conversation_ceiling
            && self.conversation_ceiling <= self.system_ceiling;

        if !ordered {
            return Err(BudgetError::InvalidPolicy(format!(
                "ceilings must satisfy final ({}) <= aggressive ({}) <= conversation ({}) <= system ({})",
                self.final_ceiling,
                self.aggressive_ceiling,
                self.conversation_ceiling,
                self.system_ceiling
            )));
        }

        if self.shrink_chars_per_unit == 0 {
            return Err(BudgetError::InvalidPolicy(
                "shrink_chars_per_unit must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Character budget for a system turn squeezed into `available` units
    pub fn shrink_ceiling(&self, available: i64) -> usize {
        (available.max(0) as usize).saturating_mul(self.shrink_chars_per_unit)
    }

    /// Cap `content` to `max_chars` characters plus the marker.
    ///
    /// Returns `None` when the content already fits.
    pub fn cap(&self, content: &str, max_chars: usize) -> Option<String> {
        let (cut, _) = content.char_indices().nth(max_chars)?;
        let mut capped = String::with_capacity(cut + self.marker.len());
        capped.push_str(&content[..cut]);
        capped.push_str(&self.marker);
        Some(capped)
    }
}

/// Budget configuration errors
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Response reserve {reserve} leaves no room within max capacity {max}")]
    ReserveExceedsCapacity { reserve: usize, max: usize },

    #[error("Invalid truncation policy: {0}")]
    InvalidPolicy(String),
}
