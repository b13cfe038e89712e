use serde_json::{json, Value};

use scribe_core::messages::{AgentMessage, Message, ToolResultMessage};
use scribe_core::provider::{ModelRequest, StreamOptions};
use scribe_core::tools::ToolDefinition;

/// Build an OpenAI-compatible `/chat/completions` request body.
pub fn build_request_body(request: &ModelRequest, options: &StreamOptions, model: &str) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 2);
    if !request.system_prompt.is_empty() {
        messages.push(json!({"role": "system", "content": request.system_prompt}));
    }
    messages.extend(request.conversation().iter().map(convert_message));

    let mut body = json!({
        "model": model,
        "messages": messages,
        "stream": true,
    });

    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.iter().map(convert_tool).collect());
        body["tool_choice"] = json!("auto");
    }
    if let Some(max) = options.max_tokens {
        body["max_tokens"] = json!(max);
    }
    if let Some(t) = options.temperature {
        body["temperature"] = json!(t);
    }

    body
}

fn convert_message(msg: &Message) -> Value {
    match msg {
        Message::User(m) => json!({"role": "user", "content": m.text}),
        Message::Agent(m) => convert_agent_message(m),
        Message::Tool(m) => convert_tool_result(m),
    }
}

fn convert_agent_message(msg: &AgentMessage) -> Value {
    let mut out = json!({"role": "assistant", "content": msg.text});
    if let Some(reasoning) = &msg.reasoning {
        out["reasoning_content"] = json!(reasoning);
    }
    if msg.has_tool_calls() {
        out["tool_calls"] = Value::Array(
            msg.tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id.as_str(),
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            // The wire format carries arguments as a JSON string.
                            "arguments": tc.arguments.to_string(),
                        }
                    })
                })
                .collect(),
        );
    }
    out
}

fn convert_tool_result(msg: &ToolResultMessage) -> Value {
    let content = if msg.is_error() {
        format!("Error: {}", msg.content)
    } else {
        msg.content.clone()
    };
    json!({
        "role": "tool",
        "tool_call_id": msg.call_id.as_str(),
        "name": msg.tool_name,
        "content": content,
    })
}

fn convert_tool(def: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters_schema,
        }
    })
}
