use futures::StreamExt;

use scribe_core::errors::GatewayError;
use scribe_core::messages::AgentMessage;
use scribe_core::provider::EventStream;
use scribe_core::stream::StreamEvent;

/// Drain a reply stream into the final agent message.
///
/// Every event is passed to `on_event` before it is interpreted, so callers
/// can render deltas live. A stream that ends without `Done` is an
/// interruption, not an empty reply.
pub async fn collect_reply(
    mut stream: EventStream,
    on_event: &mut (dyn FnMut(&StreamEvent) + Send),
) -> Result<AgentMessage, GatewayError> {
    while let Some(event) = stream.next().await {
        on_event(&event);
        match event {
            StreamEvent::Done { message, .. } => return Ok(message),
            StreamEvent::Error { error } => return Err(error),
            _ => {}
        }
    }
    Err(GatewayError::StreamInterrupted(
        "stream ended without a final message".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use scribe_core::stream::FinishReason;

    fn boxed(events: Vec<StreamEvent>) -> EventStream {
        Box::pin(stream::iter(events))
    }

    #[tokio::test]
    async fn returns_done_message_and_forwards_deltas() {
        let events = vec![
            StreamEvent::Start,
            StreamEvent::TextDelta { delta: "Chapter ".into() },
            StreamEvent::TextDelta { delta: "one".into() },
            StreamEvent::Done {
                message: AgentMessage {
                    text: "Chapter one".into(),
                    ..Default::default()
                },
                finish: FinishReason::Stop,
            },
        ];
        let mut seen = String::new();
        let msg = collect_reply(boxed(events), &mut |e: &StreamEvent| {
            if let StreamEvent::TextDelta { delta } = e {
                seen.push_str(delta);
            }
        })
        .await
        .unwrap();
        assert_eq!(msg.text, "Chapter one");
        assert_eq!(seen, "Chapter one");
    }

    #[tokio::test]
    async fn error_event_is_returned() {
        let events = vec![
            StreamEvent::Start,
            StreamEvent::Error { error: GatewayError::RateLimited { retry_after: None } },
        ];
        let err = collect_reply(boxed(events), &mut |_: &StreamEvent| {}).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn truncated_stream_is_interrupted() {
        let events = vec![StreamEvent::Start, StreamEvent::TextDelta { delta: "half".into() }];
        let err = collect_reply(boxed(events), &mut |_: &StreamEvent| {}).await.unwrap_err();
        assert!(matches!(err, GatewayError::StreamInterrupted(_)));
        assert!(err.is_retryable());
    }
}
