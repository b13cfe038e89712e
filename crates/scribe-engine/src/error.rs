use std::path::PathBuf;

use scribe_core::errors::GatewayError;

use crate::checkpoint::CheckpointError;
use crate::transcript::TranscriptError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(#[from] GatewayError),

    #[error("transcript error: {0}")]
    Transcript(#[from] TranscriptError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("no checkpoint found in {}", dir.display())]
    NoCheckpoint { dir: PathBuf },

    #[error("context budget exceeded: {usage} tokens against a hard limit of {hard}")]
    BudgetExceeded { usage: u32, hard: u32 },

    #[error("session cancelled")]
    Cancelled,

    #[error("project error: {0}")]
    Project(String),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Short machine-readable kind, used in logs and session end events.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ModelUnavailable(_) => "model_unavailable",
            Self::Transcript(_) => "invalid_range",
            Self::Checkpoint(CheckpointError::Corrupt { .. }) => "checkpoint_corrupt",
            Self::Checkpoint(_) => "checkpoint",
            Self::NoCheckpoint { .. } => "no_checkpoint",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::Cancelled => "cancelled",
            Self::Project(_) => "project",
            Self::Internal(_) => "internal",
        }
    }
}
