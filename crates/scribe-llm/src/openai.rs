use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::instrument;

use scribe_core::errors::GatewayError;
use scribe_core::provider::{EventStream, ModelProvider, ModelRequest, StreamOptions};
use scribe_core::stream::StreamEvent;

use crate::converter;
use crate::sse::{self, ChunkParser};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Environment variables checked for the API key, in order.
pub const API_KEY_VARS: [&str; 2] = ["SCRIBE_API_KEY", "MOONSHOT_API_KEY"];

/// Read the API key from the environment.
pub fn api_key_from_env() -> Option<SecretString> {
    API_KEY_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

/// Streaming client for any OpenAI-compatible chat completions endpoint.
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
}

impl OpenAiProvider {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: SecretString,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, request, options), fields(model = %self.model, messages = request.messages.len()))]
    async fn stream(
        &self,
        request: &ModelRequest,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let body = converter::build_request_body(request, options, &self.model);

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(CONNECT_TIMEOUT)
                } else {
                    GatewayError::NetworkError(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.text().await.unwrap_or_default();
            return Err(match GatewayError::from_status(status, body) {
                GatewayError::RateLimited { .. } => GatewayError::RateLimited { retry_after },
                other => other,
            });
        }

        Ok(Box::pin(SseStream::new(resp.bytes_stream())))
    }
}

/// Wraps a byte stream from reqwest and yields StreamEvents.
/// If no data arrives within the idle window, emits an error.
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: ChunkParser,
    buffer: String,
    pending: Vec<StreamEvent>,
    finished: bool,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
}

impl SseStream {
    fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self::with_idle_timeout(byte_stream, SSE_IDLE_TIMEOUT)
    }

    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: ChunkParser::new(),
            buffer: String::new(),
            pending: Vec::new(),
            finished: false,
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
        }
    }

    fn drain_complete_events(&mut self) {
        while let Some(pos) = self.buffer.find("\n\n") {
            let chunk: String = self.buffer.drain(..pos + 2).collect();
            for data in sse::parse_sse_data(&chunk) {
                let events = self.parser.parse_data(&data);
                self.pending.extend(events);
            }
        }
    }

    fn next_pending(&mut self) -> Option<StreamEvent> {
        if self.pending.is_empty() {
            return None;
        }
        let event = self.pending.remove(0);
        if event.is_terminal() {
            self.finished = true;
            self.pending.clear();
        }
        Some(event)
    }
}

impl Stream for SseStream {
    type Item = StreamEvent;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        if let Some(event) = self.next_pending() {
            return std::task::Poll::Ready(Some(event));
        }
        if self.finished {
            return std::task::Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                std::task::Poll::Ready(Some(Ok(bytes))) => {
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    let text = String::from_utf8_lossy(&bytes).replace("\r\n", "\n");
                    self.buffer.push_str(&text);
                    self.drain_complete_events();

                    if let Some(event) = self.next_pending() {
                        return std::task::Poll::Ready(Some(event));
                    }
                }
                std::task::Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return std::task::Poll::Ready(Some(StreamEvent::Error {
                        error: GatewayError::StreamInterrupted(e.to_string()),
                    }));
                }
                std::task::Poll::Ready(None) => {
                    let remaining = std::mem::take(&mut self.buffer);
                    for data in sse::parse_sse_data(&remaining) {
                        let events = self.parser.parse_data(&data);
                        self.pending.extend(events);
                    }
                    let tail = self.parser.finish_at_eof();
                    self.pending.extend(tail);
                    let event = self.next_pending();
                    self.finished = true;
                    return std::task::Poll::Ready(event);
                }
                std::task::Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.finished = true;
                        return std::task::Poll::Ready(Some(StreamEvent::Error {
                            error: GatewayError::StreamInterrupted(format!(
                                "idle timeout after {}s",
                                self.idle_duration.as_secs()
                            )),
                        }));
                    }
                    return std::task::Poll::Pending;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn channel_stream(
        idle: Duration,
    ) -> (
        tokio::sync::mpsc::Sender<Result<bytes::Bytes, reqwest::Error>>,
        Pin<Box<SseStream>>,
    ) {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let rx_stream = tokio_stream::wrappers::ReceiverStream::new(rx);
        (tx, Box::pin(SseStream::with_idle_timeout(rx_stream, idle)))
    }

    #[test]
    fn endpoint_is_normalized() {
        let p = OpenAiProvider::new("https://api.moonshot.ai/v1/", "kimi-k2-thinking", SecretString::from("k"))
            .unwrap();
        assert_eq!(p.endpoint(), "https://api.moonshot.ai/v1/chat/completions");
        assert_eq!(p.model(), "kimi-k2-thinking");
        assert_eq!(p.name(), "openai-compatible");
    }

    #[tokio::test]
    async fn events_split_across_byte_chunks() {
        let (tx, mut stream) = channel_stream(Duration::from_secs(5));
        tx.send(Ok(bytes::Bytes::from("data: {\"choices\":[{\"delta\":{\"con")))
            .await
            .unwrap();
        tx.send(Ok(bytes::Bytes::from(
            "tent\":\"Hi\"},\"finish_reason\":\"stop\"}]}\r\n\r\ndata: [DONE]\n\n",
        )))
        .await
        .unwrap();
        drop(tx);

        let mut events = Vec::new();
        while let Some(e) = stream.next().await {
            events.push(e);
        }
        assert!(matches!(events[0], StreamEvent::Start));
        assert!(matches!(&events[1], StreamEvent::TextDelta { delta } if delta == "Hi"));
        assert!(matches!(&events[2], StreamEvent::Done { message, .. } if message.text == "Hi"));
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn closed_connection_without_finish_is_an_error() {
        let (tx, mut stream) = channel_stream(Duration::from_secs(5));
        tx.send(Ok(bytes::Bytes::from("data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n")))
            .await
            .unwrap();
        drop(tx);

        let mut last = None;
        while let Some(e) = stream.next().await {
            last = Some(e);
        }
        assert!(matches!(last, Some(StreamEvent::Error { .. })));
    }

    #[tokio::test]
    async fn idle_timeout_fires_when_no_data() {
        tokio::time::pause();
        let byte_stream = futures::stream::pending::<Result<bytes::Bytes, reqwest::Error>>();
        let mut stream = Box::pin(SseStream::with_idle_timeout(byte_stream, Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(6)).await;

        let event = stream.next().await;
        assert!(
            matches!(&event, Some(StreamEvent::Error { error: GatewayError::StreamInterrupted(msg) }) if msg.contains("idle timeout")),
            "expected idle timeout error, got: {event:?}"
        );
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn api_key_vars_order() {
        assert_eq!(API_KEY_VARS[0], "SCRIBE_API_KEY");
        assert_eq!(API_KEY_VARS[1], "MOONSHOT_API_KEY");
    }
}
