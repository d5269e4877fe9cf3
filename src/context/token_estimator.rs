//! Capacity-unit estimation for text, turns, transcripts and tool schemas

use super::models::{ToolSchemaPayload, Turn};
use crate::error::{ContextError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Units charged per turn for role and formatting metadata
pub const TURN_OVERHEAD: usize = 4;

/// Default characters per unit for mixed prose, code and JSON
pub const DEFAULT_CHARS_PER_UNIT: usize = 5;

/// Token estimator trait for different tokenization strategies.
///
/// Only `estimate` is required. Turn, transcript and tool-schema sizing are
/// derived from it so every strategy charges structure the same way.
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of units in the given text
    fn estimate(&self, text: &str) -> usize;

    /// Fixed units added to every turn
    fn turn_overhead(&self) -> usize {
        TURN_OVERHEAD
    }

    /// Overhead + content + serialized tool calls + serialized function call
    fn estimate_turn(&self, turn: &Turn) -> usize {
        let mut total = self.turn_overhead() + self.estimate(turn.text());

        if let Some(calls) = turn.tool_calls.as_ref().filter(|c| !c.is_empty()) {
            total += self.estimate(&canonical_json(calls));
        }
        if let Some(call) = &turn.function_call {
            total += self.estimate(&canonical_json(call));
        }

        total
    }

    fn estimate_transcript(&self, turns: &[Turn]) -> usize {
        turns.iter().map(|t| self.estimate_turn(t)).sum()
    }

    /// Absent or empty payloads cost nothing
    fn estimate_tool_schema(&self, payload: Option<&ToolSchemaPayload>) -> usize {
        match payload {
            Some(p) if !p.is_empty() => self.estimate(&canonical_json(p)),
            _ => 0,
        }
    }
}

/// Compact JSON text used for sizing structured records
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> String {
    // infallible for these types
    serde_json::to_string(value).unwrap_or_default()
}

/// Fixed-ratio character estimator: `chars / ratio + 1`.
///
/// Cheap, deterministic and monotonic in length. Characters are Unicode
/// scalar values, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharRatioEstimator {
    chars_per_unit: usize,
}

impl CharRatioEstimator {
    pub fn new(chars_per_unit: usize) -> Self {
        Self {
            chars_per_unit: chars_per_unit.max(1),
        }
    }

    pub fn chars_per_unit(&self) -> usize {
        self.chars_per_unit
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_UNIT)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count() / self.chars_per_unit + 1
    }
}

/// Tiktoken-based estimator using cl100k_base (GPT-4, GPT-3.5-turbo)
pub struct TiktokenEstimator {
    bpe: Arc<CoreBPE>,
}

impl TiktokenEstimator {
    /// Create a new tiktoken estimator with cl100k_base encoding
    pub fn new() -> Result<Self> {
        let bpe = cl100k_base().map_err(|e| ContextError::Estimator(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Which estimator strategy to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    #[default]
    CharRatio,
    Tiktoken,
}

/// Estimator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorConfig {
    #[serde(default)]
    pub kind: EstimatorKind,

    /// Only used by the char-ratio estimator
    #[serde(default = "default_chars_per_unit")]
    pub chars_per_unit: usize,
}

fn default_chars_per_unit() -> usize {
    DEFAULT_CHARS_PER_UNIT
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            kind: EstimatorKind::default(),
            chars_per_unit: default_chars_per_unit(),
        }
    }
}

/// Build the estimator selected by configuration
pub fn build_estimator(config: &EstimatorConfig) -> Result<Arc<dyn TokenEstimator>> {
    match config.kind {
        EstimatorKind::CharRatio => Ok(Arc::new(CharRatioEstimator::new(config.chars_per_unit))),
        EstimatorKind::Tiktoken => Ok(Arc::new(TiktokenEstimator::new()?)),
    }
}
