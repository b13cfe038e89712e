use std::sync::Arc;

use scribe_core::messages::Message;
use scribe_core::tools::ToolDefinition;

use crate::transcript::Transcript;

/// Fixed per-turn cost added on top of the text estimate.
pub const PER_TURN_OVERHEAD: u32 = 4;

/// Pluggable token estimate for text and messages.
pub trait TokenEstimator: Send + Sync {
    fn estimate_text(&self, text: &str) -> u32;

    fn estimate_message(&self, message: &Message) -> u32 {
        self.estimate_text(&message.rendered_text())
            .saturating_add(PER_TURN_OVERHEAD)
    }
}

/// Conservative estimate: one token per four bytes, rounded up.
#[derive(Clone, Copy, Debug, Default)]
pub struct CharEstimator;

impl TokenEstimator for CharEstimator {
    fn estimate_text(&self, text: &str) -> u32 {
        u32::try_from(text.len().div_ceil(4)).unwrap_or(u32::MAX)
    }
}

/// Thresholds and iteration counter for one session.
#[derive(Clone)]
pub struct TokenBudget {
    soft_limit: u32,
    hard_limit: u32,
    /// Cost of the system prompt and tool schemas, sent with every request.
    overhead: u32,
    iteration: u32,
    max_iterations: u32,
    estimator: Arc<dyn TokenEstimator>,
}

impl std::fmt::Debug for TokenBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBudget")
            .field("soft_limit", &self.soft_limit)
            .field("hard_limit", &self.hard_limit)
            .field("overhead", &self.overhead)
            .field("iteration", &self.iteration)
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

impl TokenBudget {
    pub fn new(soft_limit: u32, hard_limit: u32, max_iterations: u32) -> Self {
        Self {
            soft_limit,
            hard_limit,
            overhead: 0,
            iteration: 0,
            max_iterations,
            estimator: Arc::new(CharEstimator),
        }
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Charge the system prompt and tool schemas against every request.
    pub fn with_overhead(mut self, system_prompt: &str, tools: &[ToolDefinition]) -> Self {
        let schemas: u32 = tools
            .iter()
            .map(|t| {
                self.estimator.estimate_text(&t.name)
                    + self.estimator.estimate_text(&t.description)
                    + self.estimator.estimate_text(&t.parameters_schema.to_string())
            })
            .sum();
        self.overhead = self.estimator.estimate_text(system_prompt) + schemas;
        self
    }

    pub fn estimator(&self) -> &dyn TokenEstimator {
        self.estimator.as_ref()
    }

    pub fn estimate(&self, message: &Message) -> u32 {
        self.estimator.estimate_message(message)
    }

    pub fn soft_limit(&self) -> u32 {
        self.soft_limit
    }

    pub fn hard_limit(&self) -> u32 {
        self.hard_limit
    }

    pub fn overhead(&self) -> u32 {
        self.overhead
    }

    /// Estimated tokens of the next request built from `transcript`.
    pub fn current_usage(&self, transcript: &Transcript) -> u32 {
        self.overhead.saturating_add(transcript.view_tokens())
    }

    pub fn is_over_soft(&self, transcript: &Transcript) -> bool {
        self.current_usage(transcript) >= self.soft_limit
    }

    pub fn is_over_hard(&self, transcript: &Transcript) -> bool {
        self.current_usage(transcript) > self.hard_limit
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn iterations_exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    /// Count one completed cycle. Returns the new iteration number.
    pub fn complete_iteration(&mut self) -> u32 {
        self.iteration += 1;
        self.iteration
    }

    /// Resume counting from a checkpointed iteration.
    pub fn resume_at(&mut self, iteration: u32) {
        self.iteration = iteration;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn char_estimator_rounds_up() {
        let e = CharEstimator;
        assert_eq!(e.estimate_text(""), 0);
        assert_eq!(e.estimate_text("abc"), 1);
        assert_eq!(e.estimate_text("abcde"), 2);
        assert_eq!(e.estimate_message(&Message::user_text("abcd")), 1 + PER_TURN_OVERHEAD);
    }

    #[test]
    fn thresholds_are_soft_inclusive_hard_exclusive() {
        let budget = TokenBudget::new(100, 120, 10);
        let mut t = Transcript::new();
        t.append(Message::user_text("x"), 99);
        assert!(!budget.is_over_soft(&t));
        t.append(Message::user_text("x"), 1);
        assert!(budget.is_over_soft(&t));
        assert!(!budget.is_over_hard(&t));
        t.append(Message::user_text("x"), 20);
        assert!(!budget.is_over_hard(&t));
        t.append(Message::user_text("x"), 1);
        assert!(budget.is_over_hard(&t));
    }

    #[test]
    fn overhead_counts_against_limits() {
        let tools = vec![ToolDefinition {
            name: "read_file".into(),
            description: "Read a file".into(),
            parameters_schema: serde_json::json!({"type": "object"}),
        }];
        let budget = TokenBudget::new(100, 120, 10).with_overhead("You write books.", &tools);
        assert!(budget.overhead() > 0);
        assert_eq!(budget.current_usage(&Transcript::new()), budget.overhead());
    }

    #[test]
    fn iteration_counter() {
        let mut budget = TokenBudget::new(100, 120, 2);
        assert!(!budget.iterations_exhausted());
        assert_eq!(budget.complete_iteration(), 1);
        assert_eq!(budget.complete_iteration(), 2);
        assert!(budget.iterations_exhausted());
        budget.resume_at(1);
        assert_eq!(budget.iteration(), 1);
    }

    proptest! {
        #[test]
        fn usage_grows_with_appends_and_drops_after_a_fold(
            texts in proptest::collection::vec(".{0,200}", 3..40),
            keep in 1usize..3,
        ) {
            let budget = TokenBudget::new(u32::MAX - 1, u32::MAX, 10);
            let mut t = Transcript::new();
            let mut previous = budget.current_usage(&t);
            for text in &texts {
                let msg = Message::user_text(text.clone());
                let cost = budget.estimate(&msg);
                t.append(msg, cost);
                let now = budget.current_usage(&t);
                prop_assert!(now >= previous);
                previous = now;
            }

            let live = t.live_turns();
            let fold_to = live[live.len() - 1 - keep].seq;
            let first = live[0].seq;
            // Every folded turn costs at least the per-turn overhead.
            let summary = "s".to_string();
            let cost = budget.estimator().estimate_text(&summary);
            t.replace_range(first, fold_to, summary, cost).unwrap();
            prop_assert!(budget.current_usage(&t) < previous);
        }
    }
}
