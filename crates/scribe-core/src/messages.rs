use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;

/// Who produced a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    Tool,
}

/// One unit of conversation, as the model sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "user")]
    User(UserMessage),
    #[serde(rename = "agent")]
    Agent(AgentMessage),
    #[serde(rename = "tool")]
    Tool(ToolResultMessage),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

/// A request from the model to run a named tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: serde_json::Value,
    /// Sequence number of the agent turn that issued the call.
    /// Zero until the call is recorded in a transcript.
    #[serde(default)]
    pub origin_turn: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Failure,
}

/// Why a tool call failed, as reported back to the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    InvalidArgument,
    Execution,
    Timeout,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultMessage {
    pub call_id: ToolCallId,
    pub tool_name: String,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ToolFailureKind>,
    pub content: String,
}

// --- Convenience constructors ---

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User(UserMessage { text: text.into() })
    }

    pub fn agent_text(text: impl Into<String>) -> Self {
        Message::Agent(AgentMessage {
            text: text.into(),
            ..Default::default()
        })
    }

    pub fn role(&self) -> Role {
        match self {
            Message::User(_) => Role::User,
            Message::Agent(_) => Role::Agent,
            Message::Tool(_) => Role::Tool,
        }
    }

    /// All text the message carries, used for token estimation and summaries.
    pub fn rendered_text(&self) -> String {
        match self {
            Message::User(m) => m.text.clone(),
            Message::Agent(m) => {
                let mut out = String::new();
                if let Some(r) = &m.reasoning {
                    out.push_str(r);
                    out.push('\n');
                }
                out.push_str(&m.text);
                for call in &m.tool_calls {
                    out.push('\n');
                    out.push_str(&call.name);
                    out.push(' ');
                    out.push_str(&call.arguments.to_string());
                }
                out
            }
            Message::Tool(m) => format!("{} -> {}", m.tool_name, m.content),
        }
    }
}

impl AgentMessage {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

impl ToolResultMessage {
    pub fn success(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status: ToolStatus::Success,
            failure: None,
            content: content.into(),
        }
    }

    pub fn failure(call: &ToolCall, kind: ToolFailureKind, detail: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status: ToolStatus::Failure,
            failure: Some(kind),
            content: detail.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: ToolCallId::from_raw("call_1"),
            name: name.into(),
            arguments: serde_json::json!({"filename": "ch1.md"}),
            origin_turn: 3,
        }
    }

    #[test]
    fn messages_are_tagged_by_role() {
        let json = serde_json::to_value(Message::user_text("hello")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["text"], "hello");

        let json = serde_json::to_value(Message::agent_text("done")).unwrap();
        assert_eq!(json["role"], "agent");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn failure_result_carries_kind() {
        let result = ToolResultMessage::failure(&call("write_file"), ToolFailureKind::Execution, "exists");
        assert!(result.is_error());
        let json = serde_json::to_value(Message::Tool(result)).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["status"], "failure");
        assert_eq!(json["failure"], "execution");
        assert_eq!(json["call_id"], "call_1");
    }

    #[test]
    fn rendered_text_includes_calls_and_reasoning() {
        let msg = Message::Agent(AgentMessage {
            text: "reading".into(),
            reasoning: Some("need chapter one".into()),
            tool_calls: vec![call("read_file")],
        });
        let text = msg.rendered_text();
        assert!(text.contains("need chapter one"));
        assert!(text.contains("read_file"));
        assert!(text.contains("ch1.md"));
        assert_eq!(msg.role(), Role::Agent);
    }

    #[test]
    fn origin_turn_defaults_when_absent() {
        let parsed: ToolCall =
            serde_json::from_str(r#"{"id":"call_9","name":"list_files","arguments":{}}"#).unwrap();
        assert_eq!(parsed.origin_turn, 0);
    }
}
