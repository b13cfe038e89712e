//! Folding older turns into the digest.
//!
//! A regular pass summarizes everything before the verbatim tail with a
//! dedicated model call. A forced pass folds turns without a summary and is
//! used only when a request would otherwise exceed the hard limit.

use tracing::{debug, info, instrument, warn};

use scribe_core::messages::{Message, Role};
use scribe_core::provider::{ModelProvider, ModelRequest, StreamOptions};
use scribe_core::stream::StreamEvent;
use scribe_core::turns::{Digest, Turn, TurnRange};
use scribe_llm::ReliableProvider;

use crate::budget::TokenBudget;
use crate::error::EngineError;
use crate::transcript::Transcript;
use crate::truncate::floor_boundary;

pub const SUMMARY_PROMPT: &str = "You condense the history of a long writing session. \
Summarize the conversation you are given so the work can continue without it: \
decisions made, files created or changed and what they contain, open tasks and \
the current plan. Fold any previous summary into the new one. Reply with the \
summary text only.";

/// Longest rendering of a single turn included in a summary request.
const MAX_TURN_BYTES: usize = 8_000;

#[derive(Clone, Debug)]
pub struct CompactionConfig {
    /// Most recent live turns never folded.
    pub tail_turns: usize,
    /// Output cap for the summary call.
    pub summary_max_tokens: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            tail_turns: 10,
            summary_max_tokens: 4096,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactionReport {
    /// Turns folded by this pass.
    pub folded: TurnRange,
    pub tokens_before: u32,
    pub tokens_after: u32,
    /// Folded without a summary to get under the hard limit.
    pub forced: bool,
}

pub struct CompactionEngine {
    config: CompactionConfig,
}

impl CompactionEngine {
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Live turns a regular pass would fold: everything before the tail.
    ///
    /// The boundary moves earlier while the first tail turn is a tool result,
    /// so a result is never separated from the call that produced it. The
    /// latest turn is always kept, even with a zero tail.
    pub fn plan(&self, transcript: &Transcript) -> Option<TurnRange> {
        let live = transcript.live_turns();
        let mut boundary = live.len().checked_sub(self.config.tail_turns.max(1))?;
        while boundary > 0 && live[boundary].role() == Role::Tool {
            boundary -= 1;
        }
        if boundary == 0 {
            return None;
        }
        Some(TurnRange::new(live[0].seq, live[boundary - 1].seq))
    }

    /// One summarizing pass. Returns `None` when there is nothing to fold or
    /// folding would not reduce usage.
    #[instrument(skip_all, fields(live_turns = transcript.live_len()))]
    pub async fn compact<P: ModelProvider>(
        &self,
        transcript: &mut Transcript,
        budget: &TokenBudget,
        provider: &ReliableProvider<P>,
    ) -> Result<Option<CompactionReport>, EngineError> {
        let Some(range) = self.plan(transcript) else {
            debug!("nothing outside the tail to compact");
            return Ok(None);
        };

        let tokens_before = budget.current_usage(transcript);
        let previous = transcript.digest().cloned();
        let folded_turns = folded_slice(transcript, range);
        let replaced_tokens = folded_turns.iter().map(|t| t.tokens).sum::<u32>()
            + previous.as_ref().map_or(0, |d| d.tokens);

        let request = summary_request(previous.as_ref(), folded_turns, range);
        let options = StreamOptions {
            max_tokens: Some(self.config.summary_max_tokens),
            temperature: None,
        };
        let reply = provider
            .complete(&request, &options, &mut |_: &StreamEvent| {})
            .await?;

        let covers = TurnRange::new(previous.as_ref().map_or(range.first, |d| d.covers.first), range.last);
        let summary = reply.text.trim();
        let summary = if summary.is_empty() {
            warn!("summary call returned no text");
            omission_note(range)
        } else {
            summary.to_string()
        };

        let mut digest = digest_for(summary.clone(), covers, budget);
        if digest.tokens >= replaced_tokens {
            warn!(
                summary_tokens = digest.tokens,
                replaced_tokens, "summary is not smaller than what it replaces, clipping"
            );
            let Some(clipped) = fit_digest(
                &summary,
                "\n[summary clipped]",
                covers,
                replaced_tokens.saturating_sub(1),
                budget,
            ) else {
                debug!("folded turns too small to compact");
                return Ok(None);
            };
            digest = clipped;
        }

        transcript.replace_range(range.first, range.last, digest.text, digest.tokens)?;
        let tokens_after = budget.current_usage(transcript);
        info!(
            first = range.first,
            last = range.last,
            tokens_before,
            tokens_after,
            "context compacted"
        );
        Ok(Some(CompactionReport {
            folded: range,
            tokens_before,
            tokens_after,
            forced: false,
        }))
    }

    /// Fold the oldest live turns without a summary until usage is within the
    /// hard limit, keeping at least the last turn.
    pub fn force_truncate(
        &self,
        transcript: &mut Transcript,
        budget: &TokenBudget,
    ) -> Result<Option<CompactionReport>, EngineError> {
        if !budget.is_over_hard(transcript) {
            return Ok(None);
        }
        let tokens_before = budget.current_usage(transcript);
        let hard = budget.hard_limit();

        let Some((range, digest)) = plan_forced(transcript, budget) else {
            return Err(EngineError::BudgetExceeded {
                usage: tokens_before,
                hard,
            });
        };

        transcript.replace_range(range.first, range.last, digest.text, digest.tokens)?;
        let tokens_after = budget.current_usage(transcript);
        warn!(
            first = range.first,
            last = range.last,
            tokens_before,
            tokens_after,
            hard,
            "forced truncation: turns folded without summary"
        );
        Ok(Some(CompactionReport {
            folded: range,
            tokens_before,
            tokens_after,
            forced: true,
        }))
    }
}

fn folded_slice(transcript: &Transcript, range: TurnRange) -> &[Turn] {
    let live = transcript.live_turns();
    let count = live.iter().take_while(|t| t.seq <= range.last).count();
    &live[..count]
}

fn plan_forced(transcript: &Transcript, budget: &TokenBudget) -> Option<(TurnRange, Digest)> {
    let live = transcript.live_turns();
    let previous = transcript.digest();
    let previous_text = previous.map_or("", |d| d.text.as_str());
    let hard = budget.hard_limit();

    let mut folded_tokens = 0u32;
    for k in 1..live.len() {
        folded_tokens += live[k - 1].tokens;
        let last_option = k + 1 == live.len();
        if live[k].role() == Role::Tool && !last_option {
            continue;
        }
        let remaining = transcript.live_tokens() - folded_tokens;
        let fixed = budget.overhead().saturating_add(remaining);
        if fixed >= hard {
            continue;
        }

        let range = TurnRange::new(live[0].seq, live[k - 1].seq);
        let covers = TurnRange::new(previous.map_or(range.first, |d| d.covers.first), range.last);
        let note = format!(
            "{}{}",
            if previous_text.is_empty() { "" } else { "\n" },
            omission_note(range)
        );
        if let Some(digest) = fit_digest(previous_text, &note, covers, hard - fixed, budget) {
            return Some((range, digest));
        }
    }
    None
}

fn omission_note(range: TurnRange) -> String {
    format!(
        "[turns {}-{} omitted without summary to stay within the context limit]",
        range.first, range.last
    )
}

fn digest_for(text: String, covers: TurnRange, budget: &TokenBudget) -> Digest {
    let mut digest = Digest {
        text,
        covers,
        tokens: 0,
    };
    digest.tokens = budget.estimate(&digest.to_message());
    digest
}

/// Longest prefix of `body`, followed by `suffix`, whose digest costs at most
/// `max_tokens`.
fn fit_digest(
    body: &str,
    suffix: &str,
    covers: TurnRange,
    max_tokens: u32,
    budget: &TokenBudget,
) -> Option<Digest> {
    let mut keep = body.len();
    loop {
        let cut = floor_boundary(body, keep);
        let digest = digest_for(format!("{}{suffix}", &body[..cut]), covers, budget);
        if digest.tokens <= max_tokens {
            return Some(digest);
        }
        if cut == 0 {
            return None;
        }
        let over = usize::try_from(digest.tokens - max_tokens).unwrap_or(usize::MAX);
        let step = over.saturating_mul(4).max(cut / 8).max(1);
        keep = cut.saturating_sub(step);
    }
}

fn summary_request(previous: Option<&Digest>, turns: &[Turn], range: TurnRange) -> ModelRequest {
    let mut body = String::new();
    if let Some(d) = previous {
        body.push_str("Previous summary:\n");
        body.push_str(&d.text);
        body.push_str("\n\n");
    }
    body.push_str(&format!(
        "Conversation to summarize (turns {}-{}):\n",
        range.first, range.last
    ));
    for turn in turns {
        let rendered = turn.message.rendered_text();
        let clipped = &rendered[..floor_boundary(&rendered, MAX_TURN_BYTES)];
        let role = match turn.role() {
            Role::User => "user",
            Role::Agent => "agent",
            Role::Tool => "tool",
        };
        body.push_str(&format!("[{}] {role}: {clipped}\n", turn.seq));
    }

    ModelRequest {
        system_prompt: SUMMARY_PROMPT.to_string(),
        digest: None,
        messages: vec![Message::user_text(body)],
        tools: Vec::new(),
    }
}
