//! Append-only transcript with a single leading digest.
//!
//! Every turn ever appended stays in memory and addressable by sequence
//! number. The *live* view is the digest (if any) followed by the turns that
//! have not been folded into it.

use scribe_core::messages::Message;
use scribe_core::turns::{Digest, Turn, TurnRange};

#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("invalid range {first}..={last}: {reason}")]
    InvalidRange { first: u64, last: u64, reason: String },
}

impl TranscriptError {
    fn invalid(first: u64, last: u64, reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            first,
            last,
            reason: reason.into(),
        }
    }
}

/// Borrowed view of what the model is sent.
#[derive(Clone, Copy, Debug)]
pub struct TranscriptView<'a> {
    pub digest: Option<&'a Digest>,
    pub turns: &'a [Turn],
}

impl TranscriptView<'_> {
    pub fn messages(&self) -> Vec<Message> {
        self.turns.iter().map(|t| t.message.clone()).collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
    digest: Option<Digest>,
    /// Index into `turns` of the first live turn.
    live_start: usize,
    live_tokens: u32,
    next_seq: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            ..Default::default()
        }
    }

    /// Rebuild a transcript whose live view is exactly `digest` followed by `tail`.
    pub fn restore(digest: Option<Digest>, tail: Vec<Turn>) -> Result<Self, TranscriptError> {
        for pair in tail.windows(2) {
            if pair[1].seq != pair[0].seq + 1 {
                return Err(TranscriptError::invalid(
                    pair[0].seq,
                    pair[1].seq,
                    "tail sequence numbers are not contiguous",
                ));
            }
        }
        if let (Some(d), Some(first)) = (&digest, tail.first()) {
            if d.covers.last >= first.seq {
                return Err(TranscriptError::invalid(
                    d.covers.first,
                    d.covers.last,
                    format!("digest overlaps tail starting at {}", first.seq),
                ));
            }
        }

        let next_seq = match (tail.last(), &digest) {
            (Some(t), _) => t.seq + 1,
            (None, Some(d)) => d.covers.last + 1,
            (None, None) => 1,
        };
        let live_tokens = tail.iter().map(|t| t.tokens).sum();

        Ok(Self {
            turns: tail,
            digest,
            live_start: 0,
            live_tokens,
            next_seq,
        })
    }

    /// Append a message with its estimated cost. Returns its sequence number.
    ///
    /// Tool calls in an agent message are stamped with the new turn's sequence number.
    pub fn append(&mut self, mut message: Message, tokens: u32) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Message::Agent(agent) = &mut message {
            for call in &mut agent.tool_calls {
                call.origin_turn = seq;
            }
        }
        self.turns.push(Turn { seq, tokens, message });
        self.live_tokens = self.live_tokens.saturating_add(tokens);
        seq
    }

    /// Look up any recorded turn, folded or live.
    pub fn get(&self, seq: u64) -> Option<&Turn> {
        let first = self.turns.first()?.seq;
        let idx = usize::try_from(seq.checked_sub(first)?).ok()?;
        self.turns.get(idx)
    }

    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    pub fn live_turns(&self) -> &[Turn] {
        &self.turns[self.live_start..]
    }

    /// The last `k` live turns.
    pub fn tail(&self, k: usize) -> &[Turn] {
        let live = self.live_turns();
        &live[live.len().saturating_sub(k)..]
    }

    pub fn current_view(&self) -> TranscriptView<'_> {
        TranscriptView {
            digest: self.digest.as_ref(),
            turns: self.live_turns(),
        }
    }

    /// Tokens of the live view: digest plus live turns.
    pub fn view_tokens(&self) -> u32 {
        let digest = self.digest.as_ref().map_or(0, |d| d.tokens);
        self.live_tokens.saturating_add(digest)
    }

    pub fn live_tokens(&self) -> u32 {
        self.live_tokens
    }

    pub fn live_len(&self) -> usize {
        self.turns.len() - self.live_start
    }

    /// Number of turns ever appended or restored.
    pub fn recorded_len(&self) -> usize {
        self.turns.len()
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.turns.last().map(|t| t.seq)
    }

    /// Fold live turns `first..=last` into the digest.
    ///
    /// The range must start at the first live turn. The new digest covers the
    /// previous digest's range too, so the view never holds more than one.
    pub fn replace_range(
        &mut self,
        first: u64,
        last: u64,
        text: String,
        tokens: u32,
    ) -> Result<&Digest, TranscriptError> {
        if first > last {
            return Err(TranscriptError::invalid(first, last, "range is reversed"));
        }
        let live_first = self
            .live_turns()
            .first()
            .map(|t| t.seq)
            .ok_or_else(|| TranscriptError::invalid(first, last, "no live turns"))?;
        if first < live_first {
            return Err(TranscriptError::invalid(first, last, "range targets turns already folded"));
        }
        if first != live_first {
            return Err(TranscriptError::invalid(
                first,
                last,
                format!("range must start at the first live turn ({live_first})"),
            ));
        }
        let last_seq = self.last_seq().unwrap_or(0);
        if last > last_seq {
            return Err(TranscriptError::invalid(
                first,
                last,
                format!("range extends beyond the last turn ({last_seq})"),
            ));
        }

        let count = usize::try_from(last - first + 1)
            .map_err(|_| TranscriptError::invalid(first, last, "range too large"))?;
        let folded: u32 = self.live_turns()[..count].iter().map(|t| t.tokens).sum();

        let covers_first = self.digest.as_ref().map_or(first, |d| d.covers.first);
        self.live_start += count;
        self.live_tokens = self.live_tokens.saturating_sub(folded);
        Ok(self.digest.insert(Digest {
            text,
            covers: TurnRange::new(covers_first, last),
            tokens,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_core::ids::ToolCallId;
    use scribe_core::messages::{AgentMessage, ToolCall};

    fn filled(n: u64) -> Transcript {
        let mut t = Transcript::new();
        for i in 0..n {
            t.append(Message::user_text(format!("turn {i}")), 10);
        }
        t
    }

    #[test]
    fn append_assigns_increasing_sequence_numbers() {
        let mut t = Transcript::new();
        assert_eq!(t.append(Message::user_text("a"), 5), 1);
        assert_eq!(t.append(Message::agent_text("b"), 7), 2);
        assert_eq!(t.live_tokens(), 12);
        assert_eq!(t.view_tokens(), 12);
        assert_eq!(t.tail(1)[0].seq, 2);
        assert_eq!(t.tail(10).len(), 2);
    }

    #[test]
    fn append_stamps_tool_call_origin() {
        let mut t = Transcript::new();
        t.append(Message::user_text("go"), 1);
        let seq = t.append(
            Message::Agent(AgentMessage {
                tool_calls: vec![ToolCall {
                    id: ToolCallId::new(),
                    name: "list_files".into(),
                    arguments: serde_json::json!({}),
                    origin_turn: 0,
                }],
                ..Default::default()
            }),
            3,
        );
        match &t.get(seq).unwrap().message {
            Message::Agent(a) => assert_eq!(a.tool_calls[0].origin_turn, seq),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn replace_range_folds_and_keeps_audit_trail() {
        let mut t = filled(6);
        let digest = t.replace_range(1, 4, "summary".into(), 3).unwrap();
        assert_eq!(digest.covers, TurnRange::new(1, 4));

        let view = t.current_view();
        assert_eq!(view.turns.len(), 2);
        assert_eq!(view.turns[0].seq, 5);
        assert_eq!(t.view_tokens(), 23);
        assert_eq!(t.get(2).unwrap().message, Message::user_text("turn 1"));
        assert_eq!(t.recorded_len(), 6);
    }

    #[test]
    fn second_fold_absorbs_previous_digest() {
        let mut t = filled(8);
        t.replace_range(1, 3, "first".into(), 2).unwrap();
        let digest = t.replace_range(4, 6, "second".into(), 2).unwrap();
        assert_eq!(digest.covers, TurnRange::new(1, 6));
        assert_eq!(digest.text, "second");
        assert_eq!(t.live_len(), 2);
    }

    #[test]
    fn replace_range_rejects_bad_ranges() {
        let mut t = filled(5);
        assert!(t.replace_range(3, 2, "x".into(), 1).is_err());
        assert!(t.replace_range(2, 3, "x".into(), 1).is_err());
        assert!(t.replace_range(1, 9, "x".into(), 1).is_err());

        t.replace_range(1, 2, "x".into(), 1).unwrap();
        let err = t.replace_range(1, 3, "y".into(), 1).unwrap_err();
        assert!(err.to_string().contains("already folded"));
    }

    #[test]
    fn restore_reproduces_the_view() {
        let digest = Digest {
            text: "earlier".into(),
            covers: TurnRange::new(1, 10),
            tokens: 4,
        };
        let tail = vec![
            Turn { seq: 11, tokens: 6, message: Message::user_text("eleven") },
            Turn { seq: 12, tokens: 6, message: Message::agent_text("twelve") },
        ];
        let mut t = Transcript::restore(Some(digest.clone()), tail.clone()).unwrap();
        assert_eq!(t.current_view().digest, Some(&digest));
        assert_eq!(t.current_view().turns, tail.as_slice());
        assert_eq!(t.view_tokens(), 16);
        assert_eq!(t.append(Message::user_text("next"), 2), 13);
    }

    #[test]
    fn restore_rejects_gaps_and_overlaps() {
        let gap = vec![
            Turn { seq: 1, tokens: 1, message: Message::user_text("a") },
            Turn { seq: 3, tokens: 1, message: Message::user_text("b") },
        ];
        assert!(Transcript::restore(None, gap).is_err());

        let overlap = Digest {
            text: "x".into(),
            covers: TurnRange::new(1, 5),
            tokens: 1,
        };
        let tail = vec![Turn { seq: 5, tokens: 1, message: Message::user_text("a") }];
        assert!(Transcript::restore(Some(overlap), tail).is_err());
    }

    #[test]
    fn get_out_of_range_is_none() {
        let t = filled(3);
        assert!(t.get(0).is_none());
        assert!(t.get(4).is_none());
        assert!(Transcript::new().get(1).is_none());
    }
}
