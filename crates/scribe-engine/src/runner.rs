use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use scribe_core::events::{CheckpointReason, SessionEvent};
use scribe_core::ids::{ProjectId, SessionId};
use scribe_core::messages::{AgentMessage, Message, ToolCall, ToolFailureKind, ToolResultMessage};
use scribe_core::provider::{ModelProvider, ModelRequest, StreamOptions};
use scribe_core::stream::StreamEvent;
use scribe_core::tools::{Project, SessionEffect, ToolContext, ToolDefinition};
use scribe_llm::ReliableProvider;
use scribe_settings::ScribeSettings;

use crate::budget::TokenBudget;
use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::compaction::{CompactionConfig, CompactionEngine, CompactionReport};
use crate::dispatch::{Dispatcher, ToolTimeouts};
use crate::error::EngineError;
use crate::registry::ToolRegistry;
use crate::transcript::Transcript;
use crate::truncate;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a writing agent producing long-form manuscripts. \
Call create_project before using the file tools. Keep outlines, notes and drafts in project files \
and read them back instead of relying on earlier conversation. Call compress_context when older \
conversation no longer needs to be kept word for word. Reply without tool calls only when the \
task is complete.";

const PREVIEW_CHARS: usize = 200;

/// Everything a session needs besides its provider and tools.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub system_prompt: String,
    pub soft_limit: u32,
    pub hard_limit: u32,
    pub max_iterations: u32,
    pub compaction: CompactionConfig,
    pub checkpoint_cadence: u32,
    pub checkpoint_write_timeout: Duration,
    /// Parent folder of project folders and of project-less checkpoints.
    pub output_dir: PathBuf,
    pub tool_timeouts: ToolTimeouts,
    pub max_tool_output_bytes: usize,
    pub stream_options: StreamOptions,
}

impl SessionConfig {
    pub fn from_settings(settings: &ScribeSettings) -> Self {
        let tools = &settings.tools;
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            soft_limit: settings.budget.soft_limit,
            hard_limit: settings.budget.hard_limit,
            max_iterations: settings.budget.max_iterations,
            compaction: CompactionConfig {
                tail_turns: settings.compaction.tail_turns,
                summary_max_tokens: settings.compaction.summary_max_tokens,
            },
            checkpoint_cadence: settings.checkpoints.cadence,
            checkpoint_write_timeout: Duration::from_secs(settings.checkpoints.write_timeout_secs),
            output_dir: PathBuf::from(&settings.paths.output_dir),
            tool_timeouts: ToolTimeouts {
                fast: Duration::from_secs(tools.fast_timeout_secs),
                slow: Duration::from_secs(tools.slow_timeout_secs),
                network: Duration::from_secs(tools.network_timeout_secs),
            },
            max_tool_output_bytes: tools.max_output_bytes,
            stream_options: StreamOptions {
                max_tokens: settings.model.max_tokens,
                temperature: settings.model.temperature,
            },
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&ScribeSettings::default())
    }
}

/// How a session ended without error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The model replied without tool calls.
    Completed { answer: String },
    /// The iteration ceiling was reached; a final checkpoint was written.
    MaxIterations,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    Success,
    MaxIterations,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    AwaitingModel,
    ExecutingTool,
    Terminated(Termination),
}

/// One agent session: transcript, budget, checkpoints and the loop driving them.
pub struct Session<P: ModelProvider = Arc<dyn ModelProvider>> {
    id: SessionId,
    config: SessionConfig,
    transcript: Transcript,
    budget: TokenBudget,
    compaction: CompactionEngine,
    checkpoints: CheckpointManager,
    dispatcher: Dispatcher,
    provider: ReliableProvider<P>,
    tools: Vec<ToolDefinition>,
    event_tx: broadcast::Sender<SessionEvent>,
    project: Option<Project>,
    state: LoopState,
    compaction_requested: bool,
    /// Calls left unanswered by the checkpoint this session was resumed from.
    pending_calls: Vec<ToolCall>,
    queued_input: Option<String>,
    resumed: bool,
    last_checkpoint: Option<PathBuf>,
}

impl<P: ModelProvider> Session<P> {
    pub fn new(
        config: SessionConfig,
        provider: ReliableProvider<P>,
        registry: Arc<ToolRegistry>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let tools = registry.definitions();
        let budget = TokenBudget::new(config.soft_limit, config.hard_limit, config.max_iterations)
            .with_overhead(&config.system_prompt, &tools);
        let dispatcher = Dispatcher::new(registry)
            .with_timeouts(config.tool_timeouts)
            .with_max_output(config.max_tool_output_bytes);
        let checkpoints = CheckpointManager::new(&config.output_dir, config.checkpoint_cadence)
            .with_write_timeout(config.checkpoint_write_timeout);

        Self {
            id: SessionId::new(),
            compaction: CompactionEngine::new(config.compaction.clone()),
            transcript: Transcript::new(),
            budget,
            checkpoints,
            dispatcher,
            provider,
            tools,
            event_tx,
            project: None,
            state: LoopState::Idle,
            compaction_requested: false,
            pending_calls: Vec::new(),
            queued_input: None,
            resumed: false,
            last_checkpoint: None,
            config,
        }
    }

    /// Rebuild a session from a loaded checkpoint.
    ///
    /// The live view is exactly the stored digest and tail, the iteration
    /// counter and ceiling are the stored ones, and unanswered calls are
    /// resolved when the session next runs.
    pub fn restore(
        checkpoint: Checkpoint,
        config: SessionConfig,
        provider: ReliableProvider<P>,
        registry: Arc<ToolRegistry>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Result<Self, EngineError> {
        let transcript = Transcript::restore(checkpoint.digest, checkpoint.tail)?;
        let config = SessionConfig {
            max_iterations: checkpoint.max_iterations,
            ..config
        };
        let mut session = Self::new(config, provider, registry, event_tx);
        session.id = checkpoint.session_id;
        session.transcript = transcript;
        session.budget.resume_at(checkpoint.iteration);
        session.pending_calls = checkpoint.pending_tool_calls;
        session.resumed = true;

        if let Some(id) = checkpoint.project_id {
            let root = session.config.output_dir.join(id.as_str());
            if !root.is_dir() {
                warn!(project = %id, root = %root.display(), "project folder missing on resume");
            }
            session.project = Some(Project { id, root });
        }
        Ok(session)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn project(&self) -> Option<&Project> {
        self.project.as_ref()
    }

    pub fn iteration(&self) -> u32 {
        self.budget.iteration()
    }

    pub fn last_checkpoint(&self) -> Option<&PathBuf> {
        self.last_checkpoint.as_ref()
    }

    pub fn pending_calls(&self) -> &[ToolCall] {
        &self.pending_calls
    }

    /// Queue a user turn. It is appended when the session next runs, after
    /// any pending tool calls are resolved.
    pub fn queue_input(&mut self, text: impl Into<String>) {
        self.queued_input = Some(text.into());
    }

    /// Create the project folder if needed and make it active.
    pub async fn activate_project(&mut self, id: ProjectId) -> Result<(), EngineError> {
        let root = self.config.output_dir.join(id.as_str());
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| EngineError::Project(format!("failed to create {}: {e}", root.display())))?;
        self.apply_effect(SessionEffect::ActivateProject(Project { id, root }));
        Ok(())
    }

    /// Drive the loop until a final answer, the iteration ceiling, an error
    /// or cancellation.
    #[instrument(skip_all, fields(session_id = %self.id))]
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<Outcome, EngineError> {
        let result = self.drive(cancel).await;

        let (termination, label) = match &result {
            Ok(Outcome::Completed { .. }) => (Termination::Success, "success"),
            Ok(Outcome::MaxIterations) => (Termination::MaxIterations, "max_iterations"),
            Err(e) => (Termination::Error, e.error_kind()),
        };
        match &result {
            Err(EngineError::Cancelled) => {
                info!(iteration = self.budget.iteration(), "session cancelled");
                self.write_checkpoint(CheckpointReason::Cancelled).await;
            }
            Err(e) => error!(error = %e, iteration = self.budget.iteration(), "session failed"),
            Ok(_) => info!(iteration = self.budget.iteration(), outcome = label, "session finished"),
        }

        self.state = LoopState::Terminated(termination);
        self.send(SessionEvent::SessionEnd {
            session_id: self.id.clone(),
            iteration: self.budget.iteration(),
            outcome: label.to_string(),
        });
        result
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<Outcome, EngineError> {
        self.send(SessionEvent::SessionStart {
            session_id: self.id.clone(),
            iteration: self.budget.iteration(),
            max_iterations: self.budget.max_iterations(),
            resumed: self.resumed,
        });
        self.state = LoopState::AwaitingModel;

        if !self.pending_calls.is_empty() {
            self.resolve_pending(cancel).await?;
        }
        if let Some(text) = self.queued_input.take() {
            self.push_turn(Message::user_text(text));
        }

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if self.budget.iterations_exhausted() {
                warn!(max_iterations = self.budget.max_iterations(), "iteration limit reached");
                self.write_checkpoint(CheckpointReason::Final).await;
                return Ok(Outcome::MaxIterations);
            }

            self.state = LoopState::AwaitingModel;
            self.manage_context(cancel).await?;
            self.send(SessionEvent::IterationStart {
                session_id: self.id.clone(),
                iteration: self.budget.iteration() + 1,
                usage: self.budget.current_usage(&self.transcript),
            });

            let reply = self.request_reply(cancel).await?;
            let mut calls = reply.tool_calls.clone();
            let answer = reply.text.clone();
            let seq = self.push_turn(Message::Agent(reply));

            if calls.is_empty() {
                return Ok(Outcome::Completed { answer });
            }
            for call in &mut calls {
                call.origin_turn = seq;
            }

            self.state = LoopState::ExecutingTool;
            for call in &calls {
                self.run_call(call, cancel).await?;
            }
            self.finish_cycle().await;
        }
    }

    /// Answer calls a checkpoint recorded without results.
    async fn resolve_pending(&mut self, cancel: &CancellationToken) -> Result<(), EngineError> {
        let pending = std::mem::take(&mut self.pending_calls);
        info!(count = pending.len(), "resolving tool calls pending at checkpoint");
        self.state = LoopState::ExecutingTool;

        for call in &pending {
            if self.dispatcher.is_retry_safe(call) {
                self.run_call(call, cancel).await?;
            } else {
                let result = ToolResultMessage::failure(
                    call,
                    ToolFailureKind::Cancelled,
                    "interrupted before completing and not safe to repeat automatically; \
                     check the project files and call the tool again if needed",
                );
                self.record_result(result, Duration::ZERO);
            }
        }
        self.finish_cycle().await;
        Ok(())
    }

    async fn run_call(&mut self, call: &ToolCall, cancel: &CancellationToken) -> Result<(), EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.send(SessionEvent::ToolStart {
            session_id: self.id.clone(),
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
        });

        let ctx = ToolContext {
            session_id: self.id.clone(),
            output_dir: self.config.output_dir.clone(),
            project: self.project.clone(),
            abort_signal: cancel.clone(),
        };
        let dispatched = self.dispatcher.dispatch(call, &ctx).await;
        if dispatched.was_cancelled() {
            // Left unanswered so a cancellation checkpoint records it as pending.
            return Err(EngineError::Cancelled);
        }

        self.record_result(dispatched.result, dispatched.duration);
        if let Some(effect) = dispatched.effect {
            self.apply_effect(effect);
        }
        Ok(())
    }

    fn record_result(&mut self, result: ToolResultMessage, duration: Duration) {
        self.send(SessionEvent::ToolEnd {
            session_id: self.id.clone(),
            tool_call_id: result.call_id.clone(),
            tool_name: result.tool_name.clone(),
            is_error: result.is_error(),
            result_preview: truncate::preview(&result.content, PREVIEW_CHARS),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        });
        self.push_turn(Message::Tool(result));
    }

    fn apply_effect(&mut self, effect: SessionEffect) {
        match effect {
            SessionEffect::ActivateProject(project) => {
                info!(project = %project.id, root = %project.root.display(), "project activated");
                self.send(SessionEvent::ProjectActivated {
                    session_id: self.id.clone(),
                    project_id: project.id.clone(),
                });
                self.project = Some(project);
            }
            SessionEffect::RequestCompaction => {
                debug!("compaction requested for next iteration");
                self.compaction_requested = true;
            }
        }
    }

    async fn finish_cycle(&mut self) {
        let iteration = self.budget.complete_iteration();
        debug!(iteration, usage = self.budget.current_usage(&self.transcript), "iteration complete");
        // The ceiling gets its own final checkpoint.
        if self.budget.iterations_exhausted() {
            return;
        }
        if self.checkpoints.is_due(iteration) {
            self.write_checkpoint(CheckpointReason::Cadence).await;
        }
    }

    /// Compact at most once, then force the request under the hard limit.
    async fn manage_context(&mut self, cancel: &CancellationToken) -> Result<(), EngineError> {
        let mut compacted = false;

        if self.compaction_requested || self.budget.is_over_soft(&self.transcript) {
            let requested = std::mem::take(&mut self.compaction_requested);
            info!(
                usage = self.budget.current_usage(&self.transcript),
                soft_limit = self.budget.soft_limit(),
                requested,
                "compacting context"
            );
            let report = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(EngineError::Cancelled),
                r = self.compaction.compact(&mut self.transcript, &self.budget, &self.provider) => r?,
            };
            if let Some(report) = report {
                self.report_compaction(&report);
                compacted = true;
            }
            if self.budget.is_over_soft(&self.transcript) {
                info!(
                    usage = self.budget.current_usage(&self.transcript),
                    "still over soft limit after compaction, proceeding"
                );
            }
        }

        if self.budget.is_over_hard(&self.transcript) {
            warn!(
                usage = self.budget.current_usage(&self.transcript),
                hard_limit = self.budget.hard_limit(),
                "request would exceed hard limit, entering degraded mode"
            );
            if let Some(report) = self.compaction.force_truncate(&mut self.transcript, &self.budget)? {
                self.report_compaction(&report);
                compacted = true;
            }
        }

        if compacted {
            self.write_checkpoint(CheckpointReason::Compaction).await;
        }
        Ok(())
    }

    fn report_compaction(&self, report: &CompactionReport) {
        self.send(SessionEvent::CompactionComplete {
            session_id: self.id.clone(),
            tokens_before: report.tokens_before,
            tokens_after: report.tokens_after,
            forced: report.forced,
        });
    }

    async fn request_reply(&mut self, cancel: &CancellationToken) -> Result<AgentMessage, EngineError> {
        let view = self.transcript.current_view();
        let request = ModelRequest {
            system_prompt: self.config.system_prompt.clone(),
            digest: view.digest.cloned(),
            messages: view.messages(),
            tools: self.tools.clone(),
        };
        if request.messages.is_empty() && request.digest.is_none() {
            return Err(EngineError::Internal("nothing to send: transcript is empty".into()));
        }

        let tx = self.event_tx.clone();
        let session_id = self.id.clone();
        let mut forward = move |event: &StreamEvent| {
            let out = match event {
                StreamEvent::TextDelta { delta } => SessionEvent::TextDelta {
                    session_id: session_id.clone(),
                    delta: delta.clone(),
                },
                StreamEvent::ReasoningDelta { delta } => SessionEvent::ReasoningDelta {
                    session_id: session_id.clone(),
                    delta: delta.clone(),
                },
                _ => return,
            };
            let _ = tx.send(out);
        };

        let reply = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
            r = self.provider.complete(&request, &self.config.stream_options, &mut forward) => r?,
        };
        Ok(reply)
    }

    fn push_turn(&mut self, message: Message) -> u64 {
        let tokens = self.budget.estimate(&message);
        self.transcript.append(message, tokens)
    }

    async fn write_checkpoint(&mut self, reason: CheckpointReason) -> Option<PathBuf> {
        let iteration = self.budget.iteration();
        let checkpoint = Checkpoint::capture(
            &self.id,
            self.project.as_ref().map(|p| &p.id),
            iteration,
            self.budget.max_iterations(),
            &self.transcript,
            reason,
        );
        match self.checkpoints.write(&checkpoint).await {
            Ok(path) => {
                self.send(SessionEvent::CheckpointWritten {
                    session_id: self.id.clone(),
                    iteration,
                    reason,
                    path: path.display().to_string(),
                });
                self.last_checkpoint = Some(path.clone());
                Some(path)
            }
            Err(e) => {
                warn!(error = %e, iteration, reason = reason.as_str(), "checkpoint write failed");
                self.send(SessionEvent::CheckpointFailed {
                    session_id: self.id.clone(),
                    iteration,
                    error: e.to_string(),
                });
                None
            }
        }
    }

    fn send(&self, event: SessionEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("no event receivers, event dropped");
        }
    }
}
