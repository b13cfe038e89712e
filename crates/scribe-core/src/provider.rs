use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::GatewayError;
use crate::messages::Message;
use crate::stream::StreamEvent;
use crate::tools::ToolDefinition;
use crate::turns::Digest;

/// Options controlling generation behavior.
#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// Everything sent to the model in one call.
#[derive(Clone, Debug, Default)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub digest: Option<Digest>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

impl ModelRequest {
    /// Conversation in send order: the digest (if any) leads.
    pub fn conversation(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(d) = &self.digest {
            out.push(d.to_message());
        }
        out.extend(self.messages.iter().cloned());
        out
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Trait implemented by each model endpoint client.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn stream(
        &self,
        request: &ModelRequest,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError>;
}

#[async_trait]
impl<T: ModelProvider + ?Sized> ModelProvider for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn model(&self) -> &str {
        (**self).model()
    }

    async fn stream(
        &self,
        request: &ModelRequest,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        (**self).stream(request, options).await
    }
}
