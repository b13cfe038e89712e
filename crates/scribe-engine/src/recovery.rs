//! Resuming a session from a checkpoint file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, instrument};

use scribe_core::events::SessionEvent;
use scribe_core::ids::ProjectId;
use scribe_core::provider::ModelProvider;
use scribe_llm::ReliableProvider;

use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::error::EngineError;
use crate::registry::ToolRegistry;
use crate::runner::{Session, SessionConfig};

/// Which checkpoint to resume from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoverySource {
    File(PathBuf),
    /// Newest loadable checkpoint of a project, or of the project-less area.
    Latest(Option<ProjectId>),
}

/// Find and load the checkpoint named by `source`.
pub async fn locate(
    source: &RecoverySource,
    output_dir: &Path,
) -> Result<(PathBuf, Checkpoint), EngineError> {
    match source {
        RecoverySource::File(path) => {
            let checkpoint = Checkpoint::load(path).await?;
            Ok((path.clone(), checkpoint))
        }
        RecoverySource::Latest(project) => {
            let manager = CheckpointManager::new(output_dir, 1);
            manager
                .latest_checkpoint(project.as_ref())
                .await?
                .ok_or_else(|| EngineError::NoCheckpoint {
                    dir: manager.dir_for(project.as_ref()),
                })
        }
    }
}

/// Load a checkpoint and rebuild its session. `follow_up` becomes the next
/// user turn once pending tool calls are resolved.
#[instrument(skip_all)]
pub async fn resume<P: ModelProvider>(
    source: &RecoverySource,
    follow_up: Option<String>,
    config: SessionConfig,
    provider: ReliableProvider<P>,
    registry: Arc<ToolRegistry>,
    event_tx: broadcast::Sender<SessionEvent>,
) -> Result<Session<P>, EngineError> {
    let (path, checkpoint) = locate(source, &config.output_dir).await?;
    info!(
        path = %path.display(),
        session_id = %checkpoint.session_id,
        iteration = checkpoint.iteration,
        max_iterations = checkpoint.max_iterations,
        reason = checkpoint.reason.as_str(),
        turns = checkpoint.tail.len(),
        pending = checkpoint.pending_tool_calls.len(),
        "resuming from checkpoint"
    );

    let mut session = Session::restore(checkpoint, config, provider, registry, event_tx)?;
    if let Some(text) = follow_up {
        session.queue_input(text);
    }
    Ok(session)
}
