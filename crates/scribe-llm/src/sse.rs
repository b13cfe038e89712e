use serde::Deserialize;
use serde_json::Value;

use scribe_core::errors::GatewayError;
use scribe_core::ids::ToolCallId;
use scribe_core::messages::{AgentMessage, ToolCall};
use scribe_core::stream::{FinishReason, StreamEvent};

/// State machine for parsing OpenAI-style `chat.completion.chunk` payloads.
#[derive(Default)]
pub struct ChunkParser {
    started: bool,
    done: bool,
    text: String,
    reasoning: String,
    /// Tool calls in arrival order, addressed by the provider's `index`.
    tools: Vec<ToolBlock>,
    finish: Option<FinishReason>,
}

struct ToolBlock {
    index: u32,
    id: ToolCallId,
    name: String,
    arguments_json: String,
}

impl ChunkParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Parse the payload of one `data:` line into zero or more StreamEvents.
    pub fn parse_data(&mut self, data: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        let data = data.trim();
        if data == "[DONE]" {
            self.finish_into(&mut events);
            return events;
        }

        let chunk: Chunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                self.done = true;
                events.push(StreamEvent::Error {
                    error: GatewayError::StreamInterrupted(format!("unparseable chunk: {e}")),
                });
                return events;
            }
        };

        if let Some(err) = chunk.error {
            self.done = true;
            events.push(StreamEvent::Error { error: classify_error(&err) });
            return events;
        }

        if !self.started {
            self.started = true;
            events.push(StreamEvent::Start);
        }

        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(r) = delta.reasoning_content.filter(|r| !r.is_empty()) {
                    self.reasoning.push_str(&r);
                    events.push(StreamEvent::ReasoningDelta { delta: r });
                }
                if let Some(t) = delta.content.filter(|t| !t.is_empty()) {
                    self.text.push_str(&t);
                    events.push(StreamEvent::TextDelta { delta: t });
                }
                for tc in delta.tool_calls.unwrap_or_default() {
                    self.apply_tool_delta(tc, &mut events);
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish = Some(FinishReason::parse(&reason));
            }
        }

        events
    }

    /// Called when the byte stream closes. A stream that never reported a
    /// finish reason was cut off.
    pub fn finish_at_eof(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        if self.finish.is_some() {
            self.finish_into(&mut events);
        } else {
            self.done = true;
            events.push(StreamEvent::Error {
                error: GatewayError::StreamInterrupted("connection closed mid-reply".into()),
            });
        }
        events
    }

    fn apply_tool_delta(&mut self, tc: ToolCallDelta, events: &mut Vec<StreamEvent>) {
        let pos = match self.tools.iter().position(|b| b.index == tc.index) {
            Some(p) => p,
            None => {
                let id = tc
                    .id
                    .clone()
                    .filter(|s| !s.is_empty())
                    .map(ToolCallId::from_raw)
                    .unwrap_or_default();
                let name = tc
                    .function
                    .as_ref()
                    .and_then(|f| f.name.clone())
                    .unwrap_or_default();
                events.push(StreamEvent::ToolCallStart {
                    tool_call_id: id.clone(),
                    name: name.clone(),
                });
                self.tools.push(ToolBlock {
                    index: tc.index,
                    id,
                    name,
                    arguments_json: String::new(),
                });
                self.tools.len() - 1
            }
        };

        let block = &mut self.tools[pos];
        if let Some(func) = tc.function {
            if block.name.is_empty() {
                if let Some(name) = func.name {
                    block.name = name;
                }
            }
            if let Some(args) = func.arguments.filter(|a| !a.is_empty()) {
                block.arguments_json.push_str(&args);
                events.push(StreamEvent::ToolCallDelta {
                    tool_call_id: block.id.clone(),
                    arguments_delta: args,
                });
            }
        }
    }

    fn finish_into(&mut self, events: &mut Vec<StreamEvent>) {
        self.done = true;
        if !self.started {
            events.push(StreamEvent::Start);
        }
        let tool_calls: Vec<ToolCall> = self.tools.iter().map(ToolBlock::to_call).collect();
        for tc in &tool_calls {
            events.push(StreamEvent::ToolCallEnd { tool_call: tc.clone() });
        }
        let finish = if tool_calls.is_empty() {
            self.finish.unwrap_or(FinishReason::Stop)
        } else {
            FinishReason::ToolCalls
        };
        let reasoning = (!self.reasoning.is_empty()).then(|| self.reasoning.clone());
        events.push(StreamEvent::Done {
            message: AgentMessage {
                text: self.text.clone(),
                reasoning,
                tool_calls,
            },
            finish,
        });
    }
}

impl ToolBlock {
    fn to_call(&self) -> ToolCall {
        let arguments = if self.arguments_json.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            // Unparseable arguments are passed through as a string so that
            // validation reports them back to the model.
            serde_json::from_str(&self.arguments_json)
                .unwrap_or_else(|_| Value::String(self.arguments_json.clone()))
        };
        ToolCall {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments,
            origin_turn: 0,
        }
    }
}

fn classify_error(err: &ErrorPayload) -> GatewayError {
    let kind = err.error_type.as_deref().unwrap_or_default();
    let message = err.message.clone().unwrap_or_default();
    match kind {
        "rate_limit_error" | "rate_limit_reached_error" => GatewayError::RateLimited { retry_after: None },
        "authentication_error" | "invalid_authentication_error" => {
            GatewayError::AuthenticationFailed(message)
        }
        "invalid_request_error" => {
            if message.contains("context length") || message.contains("too many tokens") {
                GatewayError::ContextWindowExceeded { limit: 0, actual: 0 }
            } else {
                GatewayError::InvalidRequest(message)
            }
        }
        _ => GatewayError::ServerError { status: 500, body: message },
    }
}

/// Extract the `data:` payloads of complete SSE events in `raw`.
/// Multi-line data fields are joined with newlines; comments are skipped.
pub fn parse_sse_data(raw: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current: Option<String> = None;

    for line in raw.lines() {
        if line.is_empty() {
            if let Some(data) = current.take() {
                payloads.push(data);
            }
        } else if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            match &mut current {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(rest);
                }
                None => current = Some(rest.to_string()),
            }
        }
    }

    if let Some(data) = current {
        payloads.push(data);
    }
    payloads
}

// --- Deserialization types for chunk payloads ---

#[derive(Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ErrorPayload>,
}

#[derive(Deserialize)]
struct Choice {
    delta: Option<Delta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: Option<String>,
}
