use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use scribe_core::errors::GatewayError;
use scribe_core::ids::ToolCallId;
use scribe_core::messages::{AgentMessage, ToolCall};
use scribe_core::provider::{EventStream, ModelProvider, ModelRequest, StreamOptions};
use scribe_core::stream::{FinishReason, StreamEvent};

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Yield a sequence of StreamEvents.
    Stream(Vec<StreamEvent>),
    /// Return an error from the stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// A final answer with no tool calls.
    pub fn stream_text(text: &str) -> Self {
        Self::Stream(vec![
            StreamEvent::Start,
            StreamEvent::TextDelta { delta: text.to_string() },
            StreamEvent::Done {
                message: AgentMessage {
                    text: text.to_string(),
                    ..Default::default()
                },
                finish: FinishReason::Stop,
            },
        ])
    }

    /// A reply that asks for the given tool calls, in order.
    pub fn stream_tool_calls(calls: Vec<(&str, serde_json::Value)>) -> Self {
        let calls: Vec<ToolCall> = calls
            .into_iter()
            .map(|(name, arguments)| ToolCall {
                id: ToolCallId::new(),
                name: name.to_string(),
                arguments,
                origin_turn: 0,
            })
            .collect();

        let mut events = vec![StreamEvent::Start];
        for call in &calls {
            events.push(StreamEvent::ToolCallStart {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
            });
            events.push(StreamEvent::ToolCallEnd { tool_call: call.clone() });
        }
        events.push(StreamEvent::Done {
            message: AgentMessage {
                text: String::new(),
                reasoning: None,
                tool_calls: calls,
            },
            finish: FinishReason::ToolCalls,
        });
        Self::Stream(events)
    }

    /// A stream that starts and then fails.
    pub fn stream_error(error: GatewayError) -> Self {
        Self::Stream(vec![StreamEvent::Start, StreamEvent::Error { error }])
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

type Fallback = Box<dyn Fn(usize) -> MockResponse + Send + Sync>;

/// Mock provider that returns pre-programmed responses in sequence and
/// records every request it receives.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    fallback: Option<Fallback>,
    requests: Mutex<Vec<ModelRequest>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Once the scripted responses run out, answer call `n` with `fallback(n)`.
    pub fn with_fallback(
        responses: Vec<MockResponse>,
        fallback: impl Fn(usize) -> MockResponse + Send + Sync + 'static,
    ) -> Self {
        Self {
            fallback: Some(Box::new(fallback)),
            ..Self::new(responses)
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream(
        &self,
        request: &ModelRequest,
        _options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let next = self.responses.lock().pop_front();
        let response = match (next, &self.fallback) {
            (Some(r), _) => r,
            (None, Some(f)) => f(idx),
            (None, None) => {
                return Err(GatewayError::InvalidRequest(format!(
                    "MockProvider: no response configured for call {idx}"
                )))
            }
        };

        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
async fn resolve_response(response: MockResponse) -> Result<EventStream, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    async fn drain(mock: &MockProvider) -> Result<Vec<StreamEvent>, GatewayError> {
        let mut stream = mock
            .stream(&ModelRequest::default(), &StreamOptions::default())
            .await?;
        let mut events = Vec::new();
        while let Some(e) = stream.next().await {
            events.push(e);
        }
        Ok(events)
    }

    #[tokio::test]
    async fn text_response() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("hello world")]);
        let events = drain(&mock).await.unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[2], StreamEvent::Done { message, finish: FinishReason::Stop } if message.text == "hello world"));
    }

    #[tokio::test]
    async fn tool_call_response() {
        let mock = MockProvider::new(vec![MockResponse::stream_tool_calls(vec![
            ("list_files", serde_json::json!({})),
            ("read_file", serde_json::json!({"filename": "outline"})),
        ])]);
        let events = drain(&mock).await.unwrap();
        match events.last() {
            Some(StreamEvent::Done { message, finish }) => {
                assert_eq!(*finish, FinishReason::ToolCalls);
                assert_eq!(message.tool_calls.len(), 2);
                assert_eq!(message.tool_calls[1].name, "read_file");
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_responses_error() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("only one")]);
        drain(&mock).await.unwrap();
        assert!(drain(&mock).await.is_err());
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn fallback_answers_after_script() {
        let mock = MockProvider::with_fallback(vec![MockResponse::stream_text("first")], |n| {
            MockResponse::stream_text(&format!("call {n}"))
        });
        drain(&mock).await.unwrap();
        let events = drain(&mock).await.unwrap();
        assert!(matches!(&events[1], StreamEvent::TextDelta { delta } if delta == "call 1"));
    }

    #[tokio::test]
    async fn requests_are_recorded() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("ok")]);
        let request = ModelRequest {
            system_prompt: "sys".into(),
            ..Default::default()
        };
        mock.stream(&request, &StreamOptions::default()).await.unwrap();
        let seen = mock.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].system_prompt, "sys");
    }

    #[tokio::test]
    async fn delayed_error() {
        tokio::time::pause();
        let mock = MockProvider::new(vec![MockResponse::delayed(
            Duration::from_secs(3),
            MockResponse::Error(GatewayError::RateLimited { retry_after: None }),
        )]);
        let result = mock.stream(&ModelRequest::default(), &StreamOptions::default()).await;
        assert!(matches!(result, Err(GatewayError::RateLimited { .. })));
    }
}
