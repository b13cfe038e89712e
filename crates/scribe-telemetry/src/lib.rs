mod warnings;

pub use warnings::{WarningLayer, WarningLog, WarningRecord};

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "scribe_llm" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Append logs to this file instead of stderr.
    pub log_file: Option<PathBuf>,
    /// How many warn+ records to keep in memory for the end-of-session report.
    pub warning_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::WARN,
            module_levels: Vec::new(),
            json: false,
            log_file: None,
            warning_capacity: 64,
        }
    }
}

/// Handle returned by [`init_telemetry`]. Keep it alive for the whole run.
pub struct TelemetryGuard {
    warnings: Arc<WarningLog>,
}

impl TelemetryGuard {
    /// Warn+ records seen since startup, oldest first.
    pub fn warnings(&self) -> Vec<WarningRecord> {
        self.warnings.snapshot()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.total()
    }
}

/// Filter directive string for a config, e.g. `info,scribe_llm=debug`.
pub fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

/// Initialize the telemetry subsystem. Call once at startup.
///
/// A second call keeps the first subscriber and returns a guard whose warning
/// log is never written to.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let filter_str = filter_directives(&config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let warnings = Arc::new(WarningLog::new(config.warning_capacity));
    let warning_layer = WarningLayer::new(warnings.clone());

    let file = config.log_file.as_ref().and_then(|path| {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("scribe-telemetry: failed to open log file {}: {e}", path.display());
                None
            }
        }
    });

    let fmt_layer = match (file, config.json) {
        (Some(f), true) => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(Mutex::new(f))
            .boxed(),
        (Some(f), false) => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(Mutex::new(f))
            .boxed(),
        (None, true) => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed(),
        (None, false) => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let init = tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .with(warning_layer)
        .try_init();
    if let Err(e) = init {
        eprintln!("scribe-telemetry: subscriber already set: {e}");
    }

    TelemetryGuard { warnings }
}
