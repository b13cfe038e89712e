use serde::{Deserialize, Serialize};

use crate::messages::{Message, Role};

/// A message recorded in a transcript. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub seq: u64,
    /// Estimated token cost, fixed at append time.
    pub tokens: u32,
    pub message: Message,
}

impl Turn {
    pub fn role(&self) -> Role {
        self.message.role()
    }
}

/// Inclusive range of turn sequence numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRange {
    pub first: u64,
    pub last: u64,
}

impl TurnRange {
    pub fn new(first: u64, last: u64) -> Self {
        Self { first, last }
    }

    pub fn len(&self) -> u64 {
        self.last.saturating_sub(self.first) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.first <= seq && seq <= self.last
    }
}

/// Condensed summary standing in for a folded run of older turns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub text: String,
    pub covers: TurnRange,
    pub tokens: u32,
}

/// Header placed in front of digest text when it is shown to the model.
pub const DIGEST_HEADER: &str = "[CONVERSATION SUMMARY]";

impl Digest {
    /// The digest as the model sees it: a leading user message.
    pub fn to_message(&self) -> Message {
        Message::user_text(format!(
            "{DIGEST_HEADER} turns {}-{}\n{}",
            self.covers.first, self.covers.last, self.text
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_bounds_are_inclusive() {
        let r = TurnRange::new(4, 9);
        assert_eq!(r.len(), 6);
        assert!(r.contains(4));
        assert!(r.contains(9));
        assert!(!r.contains(10));
        assert!(!r.is_empty());
    }

    #[test]
    fn digest_renders_as_user_message() {
        let d = Digest {
            text: "Outline agreed, chapter 1 drafted.".into(),
            covers: TurnRange::new(1, 12),
            tokens: 9,
        };
        match d.to_message() {
            Message::User(m) => {
                assert!(m.text.starts_with(DIGEST_HEADER));
                assert!(m.text.contains("turns 1-12"));
                assert!(m.text.ends_with("chapter 1 drafted."));
            }
            other => panic!("expected user message, got {other:?}"),
        }
    }

    #[test]
    fn turn_serializes_with_role_tag() {
        let turn = Turn {
            seq: 7,
            tokens: 6,
            message: Message::user_text("go on"),
        };
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["message"]["role"], "user");
        assert_eq!(turn.role(), Role::User);
    }
}
