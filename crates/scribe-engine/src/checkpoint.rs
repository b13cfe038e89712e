//! Durable, resumable snapshots of a session.
//!
//! A checkpoint holds the digest, the verbatim live turns after it, the
//! iteration counters and the active project. Files are pretty-printed JSON
//! named `checkpoint-<iteration>-<timestamp>-<reason>.json`, written to a
//! temporary file first and renamed into place so a crash never leaves a
//! half-written checkpoint under its final name.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use scribe_core::events::CheckpointReason;
use scribe_core::ids::{ProjectId, SessionId};
use scribe_core::messages::{Message, ToolCall};
use scribe_core::turns::{Digest, Turn};

use crate::transcript::Transcript;

pub const CHECKPOINT_VERSION: u32 = 1;
pub const CHECKPOINT_DIR: &str = ".checkpoints";
const FILE_PREFIX: &str = "checkpoint-";
const FILE_SUFFIX: &str = ".json";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("checkpoint write timed out after {0:?}")]
    Timeout(Duration),

    #[error("checkpoint corrupt: {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
}

impl CheckpointError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// One snapshot. Never mutated after it is written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub reason: CheckpointReason,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    pub iteration: u32,
    pub max_iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
    pub tail: Vec<Turn>,
    /// Calls from the last agent turn that have no result yet.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_tool_calls: Vec<ToolCall>,
}

impl Checkpoint {
    /// Snapshot the live view of `transcript`.
    pub fn capture(
        session_id: &SessionId,
        project_id: Option<&ProjectId>,
        iteration: u32,
        max_iterations: u32,
        transcript: &Transcript,
        reason: CheckpointReason,
    ) -> Self {
        let created_at = Utc::now();
        let view = transcript.current_view();
        Self {
            version: CHECKPOINT_VERSION,
            name: file_name(iteration, &created_at, reason),
            created_at,
            reason,
            session_id: session_id.clone(),
            project_id: project_id.cloned(),
            iteration,
            max_iterations,
            digest: view.digest.cloned(),
            tail: view.turns.to_vec(),
            pending_tool_calls: unanswered_calls(view.turns),
        }
    }

    /// Read and validate a checkpoint file.
    pub async fn load(path: &Path) -> Result<Self, CheckpointError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| CheckpointError::corrupt(path, format!("unreadable: {e}")))?;
        let checkpoint: Checkpoint = serde_json::from_slice(&raw)
            .map_err(|e| CheckpointError::corrupt(path, format!("invalid JSON: {e}")))?;
        checkpoint.validate().map_err(|reason| CheckpointError::corrupt(path, reason))?;
        Ok(checkpoint)
    }

    fn validate(&self) -> Result<(), String> {
        if self.version > CHECKPOINT_VERSION {
            return Err(format!("unsupported version {}", self.version));
        }
        if self.iteration > self.max_iterations {
            return Err(format!(
                "iteration {} exceeds max iterations {}",
                self.iteration, self.max_iterations
            ));
        }
        Transcript::restore(self.digest.clone(), self.tail.clone()).map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Calls of the last agent turn that no later tool turn answers.
pub fn unanswered_calls(turns: &[Turn]) -> Vec<ToolCall> {
    let Some((pos, agent)) = turns.iter().enumerate().rev().find_map(|(i, t)| match &t.message {
        Message::Agent(a) => Some((i, a)),
        _ => None,
    }) else {
        return Vec::new();
    };

    let answered: HashSet<_> = turns[pos + 1..]
        .iter()
        .filter_map(|t| match &t.message {
            Message::Tool(r) => Some(&r.call_id),
            _ => None,
        })
        .collect();

    agent
        .tool_calls
        .iter()
        .filter(|c| !answered.contains(&c.id))
        .cloned()
        .collect()
}

pub fn file_name(iteration: u32, created_at: &DateTime<Utc>, reason: CheckpointReason) -> String {
    format!(
        "{FILE_PREFIX}{iteration:06}-{}-{}{FILE_SUFFIX}",
        created_at.format(TIMESTAMP_FORMAT),
        reason.as_str()
    )
}

/// Checkpoint file found on disk, identified from its name alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub path: PathBuf,
    pub iteration: u32,
    /// Timestamp exactly as written in the file name.
    pub timestamp: String,
    pub reason: String,
}

impl CheckpointEntry {
    fn parse(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
        let mut parts = stem.splitn(3, '-');
        let iteration = parts.next()?.parse().ok()?;
        let timestamp = parts.next()?.to_string();
        let reason = parts.next()?.to_string();
        Some(Self {
            path,
            iteration,
            timestamp,
            reason,
        })
    }
}

/// Decides when checkpoints are due and reads/writes them.
#[derive(Clone, Debug)]
pub struct CheckpointManager {
    output_dir: PathBuf,
    cadence: u32,
    write_timeout: Duration,
}

impl CheckpointManager {
    pub fn new(output_dir: impl Into<PathBuf>, cadence: u32) -> Self {
        Self {
            output_dir: output_dir.into(),
            cadence: cadence.max(1),
            write_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn cadence(&self) -> u32 {
        self.cadence
    }

    /// Whether `iteration` completed cycles call for a cadence checkpoint.
    pub fn is_due(&self, iteration: u32) -> bool {
        iteration > 0 && iteration % self.cadence == 0
    }

    pub fn dir_for(&self, project: Option<&ProjectId>) -> PathBuf {
        match project {
            Some(id) => self.output_dir.join(id.as_str()).join(CHECKPOINT_DIR),
            None => self.output_dir.join(CHECKPOINT_DIR),
        }
    }

    /// Write atomically under the configured timeout. Returns the final path.
    pub async fn write(&self, checkpoint: &Checkpoint) -> Result<PathBuf, CheckpointError> {
        let dir = self.dir_for(checkpoint.project_id.as_ref());
        let path = dir.join(&checkpoint.name);
        let body = serde_json::to_vec_pretty(checkpoint)?;

        tokio::time::timeout(self.write_timeout, write_atomic(&dir, &path, &body))
            .await
            .map_err(|_| CheckpointError::Timeout(self.write_timeout))??;

        info!(
            path = %path.display(),
            iteration = checkpoint.iteration,
            reason = checkpoint.reason.as_str(),
            turns = checkpoint.tail.len(),
            "checkpoint written"
        );
        Ok(path)
    }

    /// Checkpoint files for a project, oldest first.
    pub async fn list(&self, project: Option<&ProjectId>) -> Result<Vec<CheckpointEntry>, CheckpointError> {
        let dir = self.dir_for(project);
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::io(&dir, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| CheckpointError::io(&dir, e))?
        {
            if let Some(parsed) = CheckpointEntry::parse(entry.path()) {
                entries.push(parsed);
            }
        }
        entries.sort_by(|a, b| {
            (a.iteration, &a.timestamp, &a.reason).cmp(&(b.iteration, &b.timestamp, &b.reason))
        });
        Ok(entries)
    }

    /// The newest checkpoint that loads cleanly, skipping corrupt ones.
    pub async fn latest_checkpoint(
        &self,
        project: Option<&ProjectId>,
    ) -> Result<Option<(PathBuf, Checkpoint)>, CheckpointError> {
        for entry in self.list(project).await?.into_iter().rev() {
            match Checkpoint::load(&entry.path).await {
                Ok(cp) => return Ok(Some((entry.path, cp))),
                Err(e) => warn!(error = %e, "skipping unusable checkpoint"),
            }
        }
        Ok(None)
    }
}

async fn write_atomic(dir: &Path, path: &Path, body: &[u8]) -> Result<(), CheckpointError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| CheckpointError::io(dir, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{file_name}.tmp"));
    tokio::fs::write(&tmp, body)
        .await
        .map_err(|e| CheckpointError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(CheckpointError::io(path, e));
    }
    debug!(path = %path.display(), bytes = body.len(), "checkpoint renamed into place");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_core::ids::ToolCallId;
    use scribe_core::messages::{AgentMessage, ToolResultMessage};
    use scribe_core::turns::TurnRange;

    fn sample_transcript() -> Transcript {
        let mut t = Transcript::new();
        t.append(Message::user_text("Write a novella about lighthouse keepers."), 12);
        t.append(Message::agent_text("Starting with an outline."), 8);
        t.append(Message::user_text("Go on."), 5);
        t.replace_range(1, 1, "User asked for a novella.".into(), 7).unwrap();
        t
    }

    fn tool_call(name: &str) -> ToolCall {
        ToolCall {
            id: ToolCallId::new(),
            name: name.into(),
            arguments: serde_json::json!({}),
            origin_turn: 0,
        }
    }

    #[test]
    fn file_names_sort_by_iteration() {
        let ts = Utc::now();
        let a = file_name(9, &ts, CheckpointReason::Cadence);
        let b = file_name(10, &ts, CheckpointReason::Compaction);
        assert!(a < b);
        assert!(b.starts_with("checkpoint-000010-"));
        assert!(b.ends_with("-compaction.json"));

        let entry = CheckpointEntry::parse(PathBuf::from(&b)).unwrap();
        assert_eq!(entry.iteration, 10);
        assert_eq!(entry.reason, "compaction");
        assert!(CheckpointEntry::parse(PathBuf::from(".tmp-file")).is_none());
    }

    #[test]
    fn cadence() {
        let mgr = CheckpointManager::new("/tmp/out", 10);
        assert!(!mgr.is_due(0));
        assert!(!mgr.is_due(9));
        assert!(mgr.is_due(10));
        assert!(mgr.is_due(20));
        assert_eq!(CheckpointManager::new("/tmp/out", 0).cadence(), 1);
    }

    #[test]
    fn directory_depends_on_project() {
        let mgr = CheckpointManager::new("/tmp/out", 10);
        assert_eq!(mgr.dir_for(None), PathBuf::from("/tmp/out/.checkpoints"));
        let id = ProjectId::sanitize("saga").unwrap();
        assert_eq!(mgr.dir_for(Some(&id)), PathBuf::from("/tmp/out/saga/.checkpoints"));
    }

    #[test]
    fn capture_records_the_live_view() {
        let t = sample_transcript();
        let cp = Checkpoint::capture(&SessionId::new(), None, 4, 300, &t, CheckpointReason::Cadence);
        assert_eq!(cp.digest.as_ref().unwrap().covers, TurnRange::new(1, 1));
        assert_eq!(cp.tail.len(), 2);
        assert_eq!(cp.tail[0].seq, 2);
        assert!(cp.pending_tool_calls.is_empty());
    }

    #[test]
    fn unanswered_calls_are_pending() {
        let first = tool_call("read_file");
        let second = tool_call("write_file");
        let mut t = Transcript::new();
        t.append(Message::user_text("go"), 1);
        t.append(
            Message::Agent(AgentMessage {
                tool_calls: vec![first.clone(), second.clone()],
                ..Default::default()
            }),
            1,
        );
        t.append(Message::Tool(ToolResultMessage::success(&first, "ok")), 1);

        let pending = unanswered_calls(t.live_turns());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
    }

    #[tokio::test]
    async fn write_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), 10);
        let project = ProjectId::sanitize("saga").unwrap();
        let cp = Checkpoint::capture(
            &SessionId::new(),
            Some(&project),
            10,
            300,
            &sample_transcript(),
            CheckpointReason::Cadence,
        );

        let path = mgr.write(&cp).await.unwrap();
        assert!(path.starts_with(dir.path().join("saga").join(CHECKPOINT_DIR)));
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n  \"iteration\": 10"), "not pretty-printed: {raw}");

        let loaded = Checkpoint::load(&path).await.unwrap();
        assert_eq!(loaded, cp);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn load_rejects_garbage_and_inconsistency() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("checkpoint-000001-x-cadence.json");
        std::fs::write(&garbage, "{ not json").unwrap();
        assert!(matches!(
            Checkpoint::load(&garbage).await,
            Err(CheckpointError::Corrupt { .. })
        ));
        assert!(matches!(
            Checkpoint::load(&dir.path().join("missing.json")).await,
            Err(CheckpointError::Corrupt { .. })
        ));

        let mut cp = Checkpoint::capture(
            &SessionId::new(),
            None,
            5,
            300,
            &sample_transcript(),
            CheckpointReason::Cadence,
        );
        cp.iteration = 301;
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, serde_json::to_vec(&cp).unwrap()).unwrap();
        let err = Checkpoint::load(&bad).await.unwrap_err();
        assert!(err.to_string().contains("exceeds max iterations"));
    }

    #[tokio::test]
    async fn latest_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), 10);
        let session = SessionId::new();
        let t = sample_transcript();

        for iteration in [10, 20] {
            let cp = Checkpoint::capture(&session, None, iteration, 300, &t, CheckpointReason::Cadence);
            mgr.write(&cp).await.unwrap();
        }
        let newest = mgr.dir_for(None).join(file_name(30, &Utc::now(), CheckpointReason::Cadence));
        std::fs::write(&newest, "truncated{").unwrap();

        let listed = mgr.list(None).await.unwrap();
        assert_eq!(
            listed.iter().map(|e| e.iteration).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );

        let (path, cp) = mgr.latest_checkpoint(None).await.unwrap().unwrap();
        assert_eq!(cp.iteration, 20);
        assert_ne!(path, newest);
    }

    #[tokio::test]
    async fn latest_of_empty_directory_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), 10);
        assert!(mgr.latest_checkpoint(None).await.unwrap().is_none());
        assert!(mgr.list(None).await.unwrap().is_empty());
    }
}
