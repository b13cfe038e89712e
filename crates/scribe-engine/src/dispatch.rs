use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{error, instrument, warn};

use scribe_core::messages::{ToolCall, ToolFailureKind, ToolResultMessage};
use scribe_core::tools::{LatencyClass, SessionEffect, Tool, ToolContext, ToolError, ToolOutput};

use crate::registry::ToolRegistry;
use crate::truncate;

const DEFAULT_MAX_OUTPUT: usize = 100_000;

/// Per latency class timeouts.
#[derive(Clone, Copy, Debug)]
pub struct ToolTimeouts {
    pub fast: Duration,
    pub slow: Duration,
    pub network: Duration,
}

impl ToolTimeouts {
    pub fn for_class(&self, class: LatencyClass) -> Duration {
        match class {
            LatencyClass::Fast => self.fast,
            LatencyClass::Slow => self.slow,
            LatencyClass::Network => self.network,
        }
    }
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            fast: LatencyClass::Fast.default_timeout(),
            slow: LatencyClass::Slow.default_timeout(),
            network: LatencyClass::Network.default_timeout(),
        }
    }
}

/// What one dispatched call produced.
#[derive(Debug)]
pub struct Dispatched {
    pub result: ToolResultMessage,
    pub effect: Option<SessionEffect>,
    pub duration: Duration,
    /// Number of attempts made, including the retry after a timeout.
    pub attempts: u32,
}

impl Dispatched {
    pub fn was_cancelled(&self) -> bool {
        self.result.failure == Some(ToolFailureKind::Cancelled)
    }
}

/// Validates and runs tool calls one at a time.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    timeouts: ToolTimeouts,
    max_output_bytes: usize,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            timeouts: ToolTimeouts::default(),
            max_output_bytes: DEFAULT_MAX_OUTPUT,
        }
    }

    pub fn with_timeouts(mut self, timeouts: ToolTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_max_output(mut self, max_bytes: usize) -> Self {
        self.max_output_bytes = max_bytes;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Whether a call may be run again without changing the outcome.
    /// Unknown tools are treated as unsafe.
    pub fn is_retry_safe(&self, call: &ToolCall) -> bool {
        self.registry
            .get(&call.name)
            .is_some_and(|t| t.is_retry_safe(&call.arguments))
    }

    /// Run one call to completion. Never fails: every outcome becomes a result.
    #[instrument(skip(self, call, ctx), fields(tool = %call.name, call_id = %call.id))]
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> Dispatched {
        let start = Instant::now();

        let tool = match self.registry.validate(&call.name, &call.arguments) {
            Ok(tool) => tool,
            Err(e) => {
                warn!(error = %e, "rejected tool call");
                return Dispatched {
                    result: ToolResultMessage::failure(call, e.failure_kind(), e.to_string()),
                    effect: None,
                    duration: start.elapsed(),
                    attempts: 0,
                };
            }
        };

        let timeout = self.timeouts.for_class(tool.latency_class());
        let mut attempts = 1;
        let mut outcome = run_once(tool.as_ref(), call, ctx, timeout).await;

        if matches!(outcome, Err(ToolError::Timeout(_))) && tool.is_retry_safe(&call.arguments) {
            warn!(timeout_secs = timeout.as_secs(), "tool timed out, retrying once");
            attempts += 1;
            outcome = run_once(tool.as_ref(), call, ctx, timeout).await;
        }

        let duration = start.elapsed();
        match outcome {
            Ok(output) => {
                let content = truncate::truncate_output(&output.content, self.max_output_bytes);
                Dispatched {
                    result: ToolResultMessage::success(call, content),
                    effect: output.effect,
                    duration,
                    attempts,
                }
            }
            Err(e) => {
                let detail = truncate::truncate_output(&e.to_string(), self.max_output_bytes);
                Dispatched {
                    result: ToolResultMessage::failure(call, e.failure_kind(), detail),
                    effect: None,
                    duration,
                    attempts,
                }
            }
        }
    }
}

async fn run_once(
    tool: &dyn Tool,
    call: &ToolCall,
    ctx: &ToolContext,
    timeout: Duration,
) -> Result<ToolOutput, ToolError> {
    let guarded = std::panic::AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx))
        .catch_unwind();

    tokio::select! {
        biased;
        () = ctx.abort_signal.cancelled() => Err(ToolError::Cancelled),
        result = tokio::time::timeout(timeout, guarded) => match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => {
                let msg = panic_message(&panic);
                error!(tool = %call.name, panic = %msg, "tool panicked during execution");
                Err(ToolError::ExecutionFailed("internal error: tool crashed".into()))
            }
            Err(_) => {
                warn!(tool = %call.name, timeout_secs = timeout.as_secs(), "tool timed out");
                Err(ToolError::Timeout(timeout))
            }
        },
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
