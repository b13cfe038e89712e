use crate::errors::GatewayError;
use crate::ids::ToolCallId;
use crate::messages::{AgentMessage, ToolCall};

/// Events emitted while a model reply streams in. Ordering contract:
///
/// Start → (TextDelta | ReasoningDelta | ToolCallStart → ToolCallDelta* → ToolCallEnd)* → Done
///
/// Error can appear at any point and ends the stream.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Start,
    TextDelta { delta: String },
    ReasoningDelta { delta: String },
    ToolCallStart { tool_call_id: ToolCallId, name: String },
    ToolCallDelta { tool_call_id: ToolCallId, arguments_delta: String },
    ToolCallEnd { tool_call: ToolCall },
    Done { message: AgentMessage, finish: FinishReason },
    Error { error: GatewayError },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
}

impl FinishReason {
    /// Map an OpenAI-style `finish_reason` string.
    pub fn parse(s: &str) -> Self {
        match s {
            "tool_calls" | "function_call" => Self::ToolCalls,
            "length" => Self::Length,
            _ => Self::Stop,
        }
    }
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
