//! # scribe
//!
//! Runs one writing-agent session from a prompt, an interactive line or a
//! checkpoint, printing lifecycle events as they arrive.

#![deny(unsafe_code)]

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use scribe_core::events::SessionEvent;
use scribe_core::ids::ProjectId;
use scribe_core::provider::ModelProvider;
use scribe_engine::tools::create_default_registry;
use scribe_engine::{Outcome, RecoverySource, Session, SessionConfig};
use scribe_llm::openai::API_KEY_VARS;
use scribe_llm::{api_key_from_env, OpenAiProvider, ReliableConfig, ReliableProvider};
use scribe_settings::{ModelSettings, ScribeSettings};
use scribe_telemetry::{init_telemetry, TelemetryConfig};

const EXIT_MAX_ITERATIONS: u8 = 2;

/// Resumable long-form writing agent.
#[derive(Parser, Debug)]
#[command(name = "scribe", about = "Resumable long-form writing agent")]
struct Cli {
    /// Task for a fresh session, or a follow-up message when recovering.
    prompt: Option<String>,

    /// Resume from this checkpoint file.
    #[arg(long, value_name = "PATH", conflicts_with = "recover_latest")]
    recover: Option<PathBuf>,

    /// Resume from the newest checkpoint (of --project, if given).
    #[arg(long)]
    recover_latest: bool,

    /// Project to activate before the first model call.
    #[arg(long, value_name = "NAME")]
    project: Option<String>,

    /// Settings file (default: ~/.scribe/settings.json).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[arg(long)]
    max_iterations: Option<u32>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Log level for stderr output; RUST_LOG takes precedence.
    #[arg(long, default_value = "warn")]
    log_level: Level,

    #[arg(long)]
    log_json: bool,

    /// Do not print the model's reasoning stream.
    #[arg(long)]
    hide_reasoning: bool,
}

impl Cli {
    fn recovery_source(&self, project: Option<&ProjectId>) -> Option<RecoverySource> {
        match (&self.recover, self.recover_latest) {
            (Some(path), _) => Some(RecoverySource::File(path.clone())),
            (None, true) => Some(RecoverySource::Latest(project.cloned())),
            (None, false) => None,
        }
    }

    fn apply_overrides(&self, settings: &mut ScribeSettings) {
        if let Some(n) = self.max_iterations {
            settings.budget.max_iterations = n;
        }
        if let Some(model) = &self.model {
            settings.model.model.clone_from(model);
        }
        if let Some(url) = &self.base_url {
            settings.model.base_url.clone_from(url);
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let telemetry = init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        json: cli.log_json,
        ..Default::default()
    });

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    };

    let warnings = telemetry.warning_count();
    if warnings > 0 {
        eprintln!("{warnings} warning(s) logged during the session");
    }
    code
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut settings = match &cli.config {
        Some(path) => scribe_settings::load_settings_from_path(path),
        None => scribe_settings::load_settings(),
    }
    .context("failed to load settings")?;
    cli.apply_overrides(&mut settings);
    settings.validate().context("invalid settings")?;

    let project = cli
        .project
        .as_deref()
        .map(|name| {
            ProjectId::sanitize(name)
                .ok_or_else(|| anyhow!("project name {name:?} has no usable characters"))
        })
        .transpose()?;
    let recovery = cli.recovery_source(project.as_ref());

    let prompt = match (cli.prompt, &recovery) {
        (Some(p), _) => Some(p),
        (None, Some(_)) => None,
        (None, None) => match read_prompt()? {
            Some(p) => Some(p),
            None => return Ok(ExitCode::SUCCESS),
        },
    };

    let api_key = api_key_from_env()
        .with_context(|| format!("no API key found; set {}", API_KEY_VARS.join(" or ")))?;
    let client: Arc<dyn ModelProvider> = Arc::new(
        OpenAiProvider::new(&settings.model.base_url, settings.model.model.clone(), api_key)
            .context("failed to build model client")?,
    );
    let provider = ReliableProvider::new(client, reliable_config(&settings.model));
    let registry = Arc::new(create_default_registry(settings.tools.web_search_results));
    let config = SessionConfig::from_settings(&settings);
    let (event_tx, event_rx) = broadcast::channel(1024);
    let printer = tokio::spawn(print_events(event_rx, !cli.hide_reasoning));

    let mut session = match &recovery {
        Some(source) => scribe_engine::resume(source, prompt, config, provider, registry, event_tx)
            .await
            .context("failed to recover session")?,
        None => {
            let mut session = Session::new(config, provider, registry, event_tx);
            if let Some(p) = prompt {
                session.queue_input(p);
            }
            session
        }
    };
    if let Some(id) = project {
        if session.project().map(|p| &p.id) != Some(&id) {
            session
                .activate_project(id)
                .await
                .context("failed to activate project")?;
        }
    }

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ncancelling, writing checkpoint...");
            on_ctrl_c.cancel();
        }
    });

    info!(session_id = %session.id(), model = %settings.model.model, "session starting");
    let result = session.run(&cancel).await;
    let last_checkpoint = session.last_checkpoint().cloned();
    // Closes the event channel so the printer drains and exits.
    drop(session);
    if let Err(e) = printer.await {
        warn!(error = %e, "event printer task failed");
    }

    match result {
        Ok(Outcome::Completed { .. }) => Ok(ExitCode::SUCCESS),
        Ok(Outcome::MaxIterations) => {
            eprintln!("{}", limit_message(last_checkpoint.as_deref()));
            Ok(ExitCode::from(EXIT_MAX_ITERATIONS))
        }
        Err(e) => Err(anyhow::Error::new(e).context("session failed")),
    }
}

/// A checkpoint written at the ceiling resumes straight into the same limit,
/// so no resume command is suggested.
fn limit_message(final_checkpoint: Option<&Path>) -> String {
    match final_checkpoint {
        Some(path) => format!(
            "iteration limit reached; final state saved to {} (its iteration limit is already spent)",
            path.display()
        ),
        None => "iteration limit reached".to_string(),
    }
}

fn reliable_config(model: &ModelSettings) -> ReliableConfig {
    ReliableConfig {
        max_retries: model.max_retries,
        base_delay: Duration::from_millis(model.initial_backoff_ms),
        max_delay: Duration::from_millis(model.max_backoff_ms),
        attempt_timeout: Duration::from_secs(model.attempt_timeout_secs),
        circuit_breaker_threshold: model.circuit_breaker_threshold,
        circuit_breaker_cooldown: Duration::from_secs(model.circuit_breaker_cooldown_secs),
        ..ReliableConfig::default()
    }
}

/// One line from stdin. `None` means the user asked to quit.
fn read_prompt() -> Result<Option<String>> {
    print!("What should scribe write? ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line).context("failed to read prompt")?;
    parse_prompt(&line)
}

fn parse_prompt(line: &str) -> Result<Option<String>> {
    let line = line.trim();
    if matches!(line.to_ascii_lowercase().as_str(), "quit" | "exit" | "q") {
        return Ok(None);
    }
    if line.is_empty() {
        bail!("empty prompt");
    }
    Ok(Some(line.to_string()))
}

async fn print_events(mut rx: broadcast::Receiver<SessionEvent>, show_reasoning: bool) {
    let mut printer = Printer::new(show_reasoning);
    let mut stdout = io::stdout();
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(e) = printer.render(&event, &mut stdout).and_then(|()| stdout.flush()) {
                    warn!(error = %e, "failed to print event");
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Renders session events as terminal text. Reasoning is shown dimmed under a
/// header that opens once per model reply.
struct Printer {
    show_reasoning: bool,
    reasoning_open: bool,
    iteration: u32,
}

impl Printer {
    fn new(show_reasoning: bool) -> Self {
        Self {
            show_reasoning,
            reasoning_open: false,
            iteration: 0,
        }
    }

    fn close_reasoning(&mut self, out: &mut impl Write) -> io::Result<()> {
        if std::mem::take(&mut self.reasoning_open) {
            writeln!(out, "{RESET}")?;
        }
        Ok(())
    }

    fn render(&mut self, event: &SessionEvent, out: &mut impl Write) -> io::Result<()> {
        if !matches!(event, SessionEvent::ReasoningDelta { .. }) {
            self.close_reasoning(out)?;
        }
        match event {
            SessionEvent::SessionStart {
                session_id,
                iteration,
                max_iterations,
                resumed,
            } => {
                let verb = if *resumed { "resumed" } else { "started" };
                writeln!(out, "[session {session_id}] {verb} at iteration {iteration}/{max_iterations}")
            }
            SessionEvent::IterationStart { iteration, usage, .. } => {
                self.iteration = *iteration;
                writeln!(out, "\n[iteration {iteration}] context {usage} tokens")
            }
            SessionEvent::TextDelta { delta, .. } => write!(out, "{delta}"),
            SessionEvent::ReasoningDelta { delta, .. } => {
                if !self.show_reasoning {
                    return Ok(());
                }
                if !self.reasoning_open {
                    self.reasoning_open = true;
                    writeln!(out, "{DIM}[reasoning, iteration {}]", self.iteration)?;
                }
                write!(out, "{delta}")
            }
            SessionEvent::ToolStart { tool_name, .. } => writeln!(out, "\n-> {tool_name}"),
            SessionEvent::ToolEnd {
                tool_name,
                is_error,
                result_preview,
                duration_ms,
                ..
            } => {
                let status = if *is_error { "failed" } else { "ok" };
                writeln!(out, "<- {tool_name} {status} ({duration_ms} ms): {result_preview}")
            }
            SessionEvent::ProjectActivated { project_id, .. } => writeln!(out, "[project] {project_id}"),
            SessionEvent::CompactionComplete {
                tokens_before,
                tokens_after,
                forced,
                ..
            } => {
                let mode = if *forced { " (forced)" } else { "" };
                writeln!(out, "[compaction] {tokens_before} -> {tokens_after} tokens{mode}")
            }
            SessionEvent::CheckpointWritten {
                iteration,
                reason,
                path,
                ..
            } => writeln!(out, "[checkpoint] {} at iteration {iteration}: {path}", reason.as_str()),
            SessionEvent::CheckpointFailed { iteration, error, .. } => {
                eprintln!("[checkpoint] failed at iteration {iteration}: {error}");
                Ok(())
            }
            SessionEvent::SessionEnd {
                iteration, outcome, ..
            } => writeln!(out, "\n[session end] {outcome} after {iteration} iteration(s)"),
        }
    }
}
