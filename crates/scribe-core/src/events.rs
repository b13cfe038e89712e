use serde::{Deserialize, Serialize};

use crate::ids::{ProjectId, SessionId, ToolCallId};

/// Why a checkpoint was written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    Cadence,
    Compaction,
    Final,
    Cancelled,
}

impl CheckpointReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cadence => "cadence",
            Self::Compaction => "compaction",
            Self::Final => "final",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Session lifecycle events, broadcast while the loop runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "session_start")]
    SessionStart {
        session_id: SessionId,
        iteration: u32,
        max_iterations: u32,
        resumed: bool,
    },

    #[serde(rename = "iteration_start")]
    IterationStart {
        session_id: SessionId,
        iteration: u32,
        usage: u32,
    },

    #[serde(rename = "text_delta")]
    TextDelta { session_id: SessionId, delta: String },

    #[serde(rename = "reasoning_delta")]
    ReasoningDelta { session_id: SessionId, delta: String },

    #[serde(rename = "tool_start")]
    ToolStart {
        session_id: SessionId,
        tool_call_id: ToolCallId,
        tool_name: String,
    },

    #[serde(rename = "tool_end")]
    ToolEnd {
        session_id: SessionId,
        tool_call_id: ToolCallId,
        tool_name: String,
        is_error: bool,
        result_preview: String,
        duration_ms: u64,
    },

    #[serde(rename = "project_activated")]
    ProjectActivated {
        session_id: SessionId,
        project_id: ProjectId,
    },

    #[serde(rename = "compaction_complete")]
    CompactionComplete {
        session_id: SessionId,
        tokens_before: u32,
        tokens_after: u32,
        forced: bool,
    },

    #[serde(rename = "checkpoint_written")]
    CheckpointWritten {
        session_id: SessionId,
        iteration: u32,
        reason: CheckpointReason,
        path: String,
    },

    #[serde(rename = "checkpoint_failed")]
    CheckpointFailed {
        session_id: SessionId,
        iteration: u32,
        error: String,
    },

    #[serde(rename = "session_end")]
    SessionEnd {
        session_id: SessionId,
        iteration: u32,
        outcome: String,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::SessionStart { session_id, .. }
            | Self::IterationStart { session_id, .. }
            | Self::TextDelta { session_id, .. }
            | Self::ReasoningDelta { session_id, .. }
            | Self::ToolStart { session_id, .. }
            | Self::ToolEnd { session_id, .. }
            | Self::ProjectActivated { session_id, .. }
            | Self::CompactionComplete { session_id, .. }
            | Self::CheckpointWritten { session_id, .. }
            | Self::CheckpointFailed { session_id, .. }
            | Self::SessionEnd { session_id, .. } => session_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionStart { .. } => "session_start",
            Self::IterationStart { .. } => "iteration_start",
            Self::TextDelta { .. } => "text_delta",
            Self::ReasoningDelta { .. } => "reasoning_delta",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::ProjectActivated { .. } => "project_activated",
            Self::CompactionComplete { .. } => "compaction_complete",
            Self::CheckpointWritten { .. } => "checkpoint_written",
            Self::CheckpointFailed { .. } => "checkpoint_failed",
            Self::SessionEnd { .. } => "session_end",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_matches_serde_tag() {
        let sid = SessionId::new();
        let events = vec![
            SessionEvent::IterationStart { session_id: sid.clone(), iteration: 3, usage: 120 },
            SessionEvent::CheckpointWritten {
                session_id: sid.clone(),
                iteration: 10,
                reason: CheckpointReason::Cadence,
                path: "/tmp/x.json".into(),
            },
            SessionEvent::SessionEnd { session_id: sid.clone(), iteration: 4, outcome: "success".into() },
        ];
        for evt in &events {
            let json = serde_json::to_value(evt).unwrap();
            assert_eq!(json["type"], evt.event_type());
            assert_eq!(evt.session_id(), &sid);
        }
    }

    #[test]
    fn checkpoint_reason_strings() {
        assert_eq!(CheckpointReason::Cadence.as_str(), "cadence");
        assert_eq!(
            serde_json::to_string(&CheckpointReason::Cancelled).unwrap(),
            r#""cancelled""#
        );
    }
}
