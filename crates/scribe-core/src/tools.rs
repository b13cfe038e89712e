use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ids::{ProjectId, SessionId};
use crate::messages::ToolFailureKind;

/// Expected latency of a tool, which selects its timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyClass {
    /// Local bookkeeping and small file reads.
    Fast,
    /// Large local I/O.
    Slow,
    /// Calls to remote services.
    Network,
}

impl LatencyClass {
    pub fn default_timeout(self) -> Duration {
        match self {
            Self::Fast => Duration::from_secs(30),
            Self::Slow => Duration::from_secs(120),
            Self::Network => Duration::from_secs(60),
        }
    }
}

/// A project folder the file tools operate in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub root: PathBuf,
}

/// Context available to tools during execution.
pub struct ToolContext {
    pub session_id: SessionId,
    /// Parent directory of all project folders.
    pub output_dir: PathBuf,
    pub project: Option<Project>,
    pub abort_signal: CancellationToken,
}

impl ToolContext {
    pub fn require_project(&self) -> Result<&Project, ToolError> {
        self.project.as_ref().ok_or_else(|| {
            ToolError::ExecutionFailed(
                "no active project; call create_project first".into(),
            )
        })
    }
}

/// State change a tool asks the session to apply after it returns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEffect {
    ActivateProject(Project),
    RequestCompaction,
}

/// Successful tool outcome.
#[derive(Clone, Debug)]
pub struct ToolOutput {
    pub content: String,
    pub effect: Option<SessionEffect>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            effect: None,
        }
    }

    pub fn with_effect(mut self, effect: SessionEffect) -> Self {
        self.effect = Some(effect);
        self
    }
}

/// Tool definition sent to the model as part of every request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Trait implemented by each tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether the tool changes state outside the session.
    fn mutates(&self) -> bool {
        false
    }

    fn latency_class(&self) -> LatencyClass {
        LatencyClass::Fast
    }

    /// Whether running this exact call twice leaves the same state as once.
    fn is_retry_safe(&self, _args: &serde_json::Value) -> bool {
        !self.mutates()
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn failure_kind(&self) -> ToolFailureKind {
        match self {
            Self::InvalidArguments(_) => ToolFailureKind::InvalidArgument,
            Self::ExecutionFailed(_) => ToolFailureKind::Execution,
            Self::Timeout(_) => ToolFailureKind::Timeout,
            Self::Cancelled => ToolFailureKind::Cancelled,
        }
    }
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        Self::ExecutionFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Outline;

    #[async_trait]
    impl Tool for Outline {
        fn name(&self) -> &str {
            "outline"
        }
        fn description(&self) -> &str {
            "test outline tool"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(
            &self,
            _args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text("ok"))
        }
    }

    #[test]
    fn read_only_tools_default_to_retry_safe() {
        let tool = Outline;
        assert!(!tool.mutates());
        assert!(tool.is_retry_safe(&serde_json::json!({})));
        assert_eq!(tool.latency_class(), LatencyClass::Fast);
        assert_eq!(tool.to_definition().name, "outline");
    }

    #[test]
    fn latency_classes_have_ordered_timeouts() {
        assert!(LatencyClass::Fast.default_timeout() < LatencyClass::Network.default_timeout());
        assert!(LatencyClass::Network.default_timeout() < LatencyClass::Slow.default_timeout());
    }

    #[test]
    fn missing_project_is_an_execution_failure() {
        let ctx = ToolContext {
            session_id: SessionId::new(),
            output_dir: PathBuf::from("/tmp"),
            project: None,
            abort_signal: CancellationToken::new(),
        };
        let err = ctx.require_project().unwrap_err();
        assert_eq!(err.failure_kind(), ToolFailureKind::Execution);
        assert!(err.to_string().contains("create_project"));
    }

    #[test]
    fn error_kinds_map_to_failure_kinds() {
        assert_eq!(
            ToolError::InvalidArguments("x".into()).failure_kind(),
            ToolFailureKind::InvalidArgument
        );
        assert_eq!(
            ToolError::Timeout(Duration::from_secs(1)).failure_kind(),
            ToolFailureKind::Timeout
        );
        assert_eq!(ToolError::Cancelled.failure_kind(), ToolFailureKind::Cancelled);
    }
}
