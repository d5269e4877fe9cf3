//! Transcript budgeter
//!
//! Fits a transcript into the units left after the response reserve and the
//! tool schema, escalating through:
//! - Fast path (already fits)
//! - Per-turn content capping
//! - Oldest-first eviction of conversation turns
//! - Aggressive capping of the last two conversation turns
//! - A final capping pass over every turn
//!
//! System turns are never evicted. When they alone exceed the budget, the
//! first one is shrunk and returned with the latest conversation turn.

use super::models::{ToolSchemaPayload, Turn};
use super::token_budget::{BudgetConfig, TruncationPolicy};
use super::token_estimator::{build_estimator, CharRatioEstimator, TokenEstimator};
use crate::config::Config;
use crate::error::Result;
use crate::metrics::METRICS;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stage of the budgeter that produced a transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStage {
    /// Input already fit (or was empty)
    Unchanged,
    /// Tool schema left no room; only the last turn was kept
    ToolSchemaOverflow,
    /// System turns alone exceeded the budget
    SystemFloor,
    /// Content capping and oldest-first eviction were enough
    Trimmed,
    /// The last two conversation turns were capped aggressively
    AggressiveCap,
    /// Every turn went through the final capping pass
    FinalCap,
}

impl FitStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FitStage::Unchanged => "unchanged",
            FitStage::ToolSchemaOverflow => "tool_schema_overflow",
            FitStage::SystemFloor => "system_floor",
            FitStage::Trimmed => "trimmed",
            FitStage::AggressiveCap => "aggressive_cap",
            FitStage::FinalCap => "final_cap",
        }
    }
}

/// Fitted transcript with a summary of what was done to it
#[derive(Debug, Clone, Serialize)]
pub struct FitOutcome {
    pub turns: Vec<Turn>,
    pub stage: FitStage,
    pub units_before: usize,
    pub units_after: usize,
    /// Units available to the transcript; negative when the tool schema overflows
    pub available: i64,
    pub evicted: usize,
}

impl FitOutcome {
    pub fn within_budget(&self) -> bool {
        self.units_after as i64 <= self.available
    }
}

/// Fits transcripts to a capacity budget
pub struct TranscriptBudgeter {
    estimator: Arc<dyn TokenEstimator>,
    policy: TruncationPolicy,
}

impl Default for TranscriptBudgeter {
    fn default() -> Self {
        Self::new(Arc::new(CharRatioEstimator::default()), TruncationPolicy::default())
    }
}

impl TranscriptBudgeter {
    pub fn new(estimator: Arc<dyn TokenEstimator>, policy: TruncationPolicy) -> Self {
        Self { estimator, policy }
    }

    /// Build the estimator and policy named by configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let estimator = build_estimator(&config.estimator)?;
        Ok(Self::new(estimator, config.truncation.clone()))
    }

    pub fn estimator(&self) -> &dyn TokenEstimator {
        self.estimator.as_ref()
    }

    pub fn policy(&self) -> &TruncationPolicy {
        &self.policy
    }

    /// Fit `turns` within `budget`, leaving room for `tools`.
    ///
    /// The input is never modified.
    pub fn fit(
        &self,
        turns: &[Turn],
        budget: &BudgetConfig,
        tools: Option<&ToolSchemaPayload>,
    ) -> Vec<Turn> {
        self.fit_with_report(turns, budget, tools).turns
    }

    /// Like [`fit`](Self::fit), also reporting the stage reached and sizes
    pub fn fit_with_report(
        &self,
        turns: &[Turn],
        budget: &BudgetConfig,
        tools: Option<&ToolSchemaPayload>,
    ) -> FitOutcome {
        let outcome = self.run_stages(turns, budget, tools);

        METRICS.record_fit(
            outcome.stage.as_str(),
            outcome.units_after,
            outcome.evicted,
            outcome.within_budget(),
        );

        outcome
    }

    fn run_stages(
        &self,
        turns: &[Turn],
        budget: &BudgetConfig,
        tools: Option<&ToolSchemaPayload>,
    ) -> FitOutcome {
        let tool_units = self.estimator.estimate_tool_schema(tools);
        let available = budget.available(tool_units);
        let units_before = self.estimator.estimate_transcript(turns);

        let Some(last) = turns.last() else {
            return self.outcome(turns, Vec::new(), FitStage::Unchanged, units_before, available);
        };

        if available <= 0 {
            warn!(
                "Tool schema ({} units) exhausts the budget of {}, keeping only the last turn",
                tool_units,
                budget.prompt_budget()
            );
            return self.outcome(
                turns,
                vec![last.clone()],
                FitStage::ToolSchemaOverflow,
                units_before,
                available,
            );
        }

        if units_before as i64 <= available {
            debug!("Transcript fits: {} <= {} units", units_before, available);
            return self.outcome(turns, turns.to_vec(), FitStage::Unchanged, units_before, available);
        }

        info!(
            "Transcript exceeds budget: {} > {} units ({} turns)",
            units_before,
            available,
            turns.len()
        );

        let (system, conversation): (Vec<&Turn>, Vec<&Turn>) =
            turns.iter().partition(|t| t.is_system());

        let system: Vec<Turn> = system
            .into_iter()
            .map(|t| self.cap_turn(t, self.policy.system_ceiling))
            .collect();
        let mut conversation: Vec<Turn> = conversation
            .into_iter()
            .map(|t| self.cap_turn(t, self.policy.conversation_ceiling))
            .collect();

        let system_units = self.estimator.estimate_transcript(&system);
        let conversation_budget = available - system_units as i64;

        if conversation_budget <= 0 {
            warn!(
                "System turns ({} units) exceed the available {} units, shrinking the first one",
                system_units, available
            );
            let mut kept: Vec<Turn> = system
                .first()
                .map(|t| self.cap_turn(t, self.policy.shrink_ceiling(available)))
                .into_iter()
                .collect();
            kept.extend(conversation.pop());
            return self.outcome(turns, kept, FitStage::SystemFloor, units_before, available);
        }

        let mut stage = FitStage::Trimmed;
        let mut conversation_units = self.estimator.estimate_transcript(&conversation);
        let mut start = 0;

        while conversation.len() - start > 1 && conversation_units as i64 > conversation_budget {
            if conversation.len() - start == 2 {
                for turn in &mut conversation[start..] {
                    *turn = self.cap_turn(turn, self.policy.aggressive_ceiling);
                }
                stage = FitStage::AggressiveCap;
                break;
            }
            conversation_units -= self.estimator.estimate_turn(&conversation[start]);
            start += 1;
        }

        if start > 0 {
            debug!(
                "Evicted {} oldest conversation turns to fit {} units",
                start, conversation_budget
            );
        }

        let mut result = system;
        result.extend(conversation.drain(start..));

        if self.estimator.estimate_transcript(&result) as i64 > available {
            warn!("Transcript still over budget after eviction, capping every turn");
            result = result
                .iter()
                .map(|t| self.cap_turn(t, self.policy.final_ceiling))
                .collect();
            stage = FitStage::FinalCap;
        }

        self.outcome(turns, result, stage, units_before, available)
    }

    /// Copy of `turn` with content capped to `max_chars`
    fn cap_turn(&self, turn: &Turn, max_chars: usize) -> Turn {
        match turn.content.as_deref().and_then(|c| self.policy.cap(c, max_chars)) {
            Some(capped) => turn.with_content(capped),
            None => turn.clone(),
        }
    }

    fn outcome(
        &self,
        input: &[Turn],
        turns: Vec<Turn>,
        stage: FitStage,
        units_before: usize,
        available: i64,
    ) -> FitOutcome {
        let units_after = self.estimator.estimate_transcript(&turns);
        FitOutcome {
            evicted: input.len() - turns.len(),
            turns,
            stage,
            units_before,
            units_after,
            available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::models::{FunctionCall, Role, ToolCall};
    use serde_json::json;

    fn budgeter() -> TranscriptBudgeter {
        TranscriptBudgeter::default()
    }

    fn text(len: usize, fill: char) -> String {
        std::iter::repeat(fill).take(len).collect()
    }

    #[test]
    fn test_empty_transcript_is_unchanged() {
        let outcome = budgeter().fit_with_report(&[], &BudgetConfig::default(), None);
        assert!(outcome.turns.is_empty());
        assert_eq!(outcome.stage, FitStage::Unchanged);
    }

    #[test]
    fn test_fitting_transcript_is_unchanged() {
        let turns = vec![Turn::system(text(200, 's')), Turn::user(text(50, 'u'))];
        let outcome = budgeter().fit_with_report(&turns, &BudgetConfig::default(), None);

        assert_eq!(outcome.turns, turns);
        assert_eq!(outcome.stage, FitStage::Unchanged);
        assert_eq!(outcome.units_before, 60);
        assert_eq!(outcome.evicted, 0);
    }

    #[test]
    fn test_tool_schema_overflow_keeps_last_turn() {
        let turns = vec![
            Turn::system("rules"),
            Turn::user("first"),
            Turn::assistant("answer"),
        ];
        let tools = ToolSchemaPayload::new(json!([{"description": text(20_000, 'd')}]));

        let outcome = budgeter().fit_with_report(&turns, &BudgetConfig::default(), Some(&tools));
        assert_eq!(outcome.turns, vec![Turn::assistant("answer")]);
        assert_eq!(outcome.stage, FitStage::ToolSchemaOverflow);
        assert!(outcome.available <= 0);
    }

    #[test]
    fn test_reserve_above_capacity_keeps_last_turn() {
        let turns = vec![Turn::user("a"), Turn::user("b")];
        let result = budgeter().fit(&turns, &BudgetConfig::new(10, 20), None);
        assert_eq!(result, vec![Turn::user("b")]);
    }

    #[test]
    fn test_eviction_drops_oldest_conversation_turns() {
        let mut turns = vec![Turn::system(text(200, 's'))];
        for i in 0..50 {
            let fill = char::from(b'a' + (i % 26) as u8);
            turns.push(Turn::user(text(6000, fill)));
        }

        let outcome = budgeter().fit_with_report(&turns, &BudgetConfig::default(), None);

        // 45 units of system, 608 per capped conversation turn, 3027 left for them
        assert_eq!(outcome.stage, FitStage::Trimmed);
        assert_eq!(outcome.turns.len(), 5);
        assert_eq!(outcome.evicted, 46);
        assert_eq!(outcome.units_after, 45 + 4 * 608);
        assert!(outcome.within_budget());
        assert_eq!(outcome.turns[0], turns[0]);

        let last = outcome.turns.last().unwrap();
        assert!(last.text().starts_with(&turns[50].text()[..3000]));
        assert!(last.text().ends_with("\n...[truncated]"));
    }

    #[test]
    fn test_system_floor_shrinks_first_system_turn() {
        let turns = vec![Turn::system("0123456789"), Turn::user("hello")];
        let outcome = budgeter().fit_with_report(&turns, &BudgetConfig::new(1, 0), None);

        assert_eq!(outcome.stage, FitStage::SystemFloor);
        assert_eq!(
            outcome.turns,
            vec![Turn::system("012\n...[truncated]"), Turn::user("hello")]
        );
    }

    #[test]
    fn test_system_floor_keeps_only_first_system_turn() {
        let turns = vec![
            Turn::system(text(5000, 'a')),
            Turn::system(text(5000, 'b')),
            Turn::user("q1"),
            Turn::user("q2"),
        ];
        let result = budgeter().fit(&turns, &BudgetConfig::new(600, 0), None);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].role, Role::System);
        assert!(result[0].text().starts_with(&text(1800, 'a')));
        assert_eq!(result[0].text().chars().count(), 1800 + 15);
        assert_eq!(result[1], Turn::user("q2"));
    }

    #[test]
    fn test_system_only_transcript_over_budget() {
        let turns = vec![Turn::system(text(10_000, 's'))];
        let result = budgeter().fit(&turns, &BudgetConfig::new(100, 0), None);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].text().chars().count(), 300 + 15);
    }

    #[test]
    fn test_last_two_turns_are_capped_not_evicted() {
        let turns = vec![Turn::user(text(5000, 'u')), Turn::assistant(text(5000, 'a'))];
        let outcome = budgeter().fit_with_report(&turns, &BudgetConfig::new(1000, 0), None);

        assert_eq!(outcome.stage, FitStage::AggressiveCap);
        assert_eq!(outcome.turns.len(), 2);
        assert_eq!(outcome.turns[0].role, Role::User);
        assert_eq!(outcome.turns[1].role, Role::Assistant);
        for turn in &outcome.turns {
            assert_eq!(turn.text().chars().count(), 500 + 15);
        }
        assert_eq!(outcome.units_after, 216);
    }

    #[test]
    fn test_final_pass_caps_every_turn() {
        let turns = vec![
            Turn::system(text(6000, 's')),
            Turn::user(text(5000, 'u')),
            Turn::assistant(text(5000, 'a')),
        ];
        let outcome = budgeter().fit_with_report(&turns, &BudgetConfig::new(850, 0), None);

        assert_eq!(outcome.stage, FitStage::FinalCap);
        assert_eq!(outcome.turns.len(), 3);
        for turn in &outcome.turns {
            assert_eq!(turn.text().chars().count(), 300 + 15);
        }
        assert_eq!(outcome.units_after, 3 * 68);
        assert!(outcome.within_budget());
    }

    #[test]
    fn test_system_turns_are_moved_first_in_order() {
        let turns = vec![
            Turn::system(format!("A{}", text(100, 'a'))),
            Turn::user(text(4000, '1')),
            Turn::system(format!("B{}", text(100, 'b'))),
            Turn::assistant(text(4000, '2')),
            Turn::user(text(4000, '3')),
            Turn::assistant("latest"),
        ];
        let result = budgeter().fit(&turns, &BudgetConfig::new(2000, 500), None);

        assert_eq!(result[0], turns[0]);
        assert_eq!(result[1], turns[2]);
        assert!(result[2..].iter().all(|t| !t.is_system()));
        assert_eq!(result.last(), turns.last());
    }

    #[test]
    fn test_tool_calls_survive_capping() {
        let call = ToolCall::new("call_1", FunctionCall::new("get_order_details", "{\"order_id\":\"#W1\"}"));
        let turns = vec![
            Turn::user(text(4000, 'q')),
            Turn::assistant_tool_calls(vec![call.clone()]),
            Turn::tool("call_1", text(4000, 'r')),
        ];
        let result = budgeter().fit(&turns, &BudgetConfig::new(1000, 200), None);

        let assistant = result.iter().find(|t| t.role == Role::Assistant).unwrap();
        assert_eq!(assistant.tool_calls.as_deref(), Some(&[call][..]));
        assert!(assistant.content.is_none());

        let tool = result.last().unwrap();
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_refit_is_noop() {
        let mut turns = vec![Turn::system(text(300, 's'))];
        turns.extend((0..20).map(|i| Turn::user(text(2000 + i * 10, 'x'))));
        let config = BudgetConfig::default();

        let once = budgeter().fit(&turns, &config, None);
        let twice = budgeter().fit(&once, &config, None);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_custom_policy_ceilings() {
        let policy = TruncationPolicy {
            conversation_ceiling: 100,
            marker: "…".to_string(),
            ..TruncationPolicy::default()
        };
        let budgeter = TranscriptBudgeter::new(Arc::new(CharRatioEstimator::default()), policy);
        let turns = vec![Turn::user(text(1000, 'x'))];

        let result = budgeter.fit(&turns, &BudgetConfig::new(150, 0), None);
        assert_eq!(result[0].text(), format!("{}…", text(100, 'x')));
    }

    #[test]
    fn test_fit_is_recorded_in_global_metrics() {
        let counter = || METRICS.fit_total.with_label_values(&["aggressive_cap"]).get();
        let before = counter();

        let turns = vec![Turn::user(text(5000, 'u')), Turn::assistant(text(5000, 'a'))];
        let outcome = budgeter().fit_with_report(&turns, &BudgetConfig::new(1000, 0), None);
        assert_eq!(outcome.stage, FitStage::AggressiveCap);

        // other tests share the global registry, so only the delta is stable
        assert!(counter() - before >= 1.0);
        let exported = METRICS.gather_text();
        assert!(exported.contains("context_fit_total"));
        assert!(exported.contains("stage=\"aggressive_cap\""));
    }
}
