//! Settings types with documented defaults.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScribeSettings {
    pub model: ModelSettings,
    pub budget: BudgetSettings,
    pub compaction: CompactionSettings,
    pub checkpoints: CheckpointSettings,
    pub tools: ToolSettings,
    pub paths: PathSettings,
}

impl ScribeSettings {
    /// Reject combinations the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        let b = &self.budget;
        if b.soft_limit == 0 || b.hard_limit == 0 {
            return Err(SettingsError::InvalidValue("token limits must be positive".into()));
        }
        if b.soft_limit >= b.hard_limit {
            return Err(SettingsError::InvalidValue(format!(
                "soft limit ({}) must be below hard limit ({})",
                b.soft_limit, b.hard_limit
            )));
        }
        if b.max_iterations == 0 {
            return Err(SettingsError::InvalidValue("max iterations must be at least 1".into()));
        }
        if self.checkpoints.cadence == 0 {
            return Err(SettingsError::InvalidValue("checkpoint cadence must be at least 1".into()));
        }
        if self.compaction.tail_turns == 0 {
            return Err(SettingsError::InvalidValue("compaction tail must keep at least 1 turn".into()));
        }
        if self.model.attempt_timeout_secs == 0 {
            return Err(SettingsError::InvalidValue("model timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Model endpoint settings. The API key is read from the environment only.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    /// OpenAI-compatible API root.
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Timeout for one complete model reply.
    pub attempt_timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failures before the circuit opens.
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.moonshot.ai/v1".into(),
            model: "kimi-k2-thinking".into(),
            max_tokens: None,
            temperature: Some(1.0),
            attempt_timeout_secs: 300,
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown_secs: 30,
        }
    }
}

/// Token budget and iteration ceiling.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BudgetSettings {
    /// Usage at or above this triggers compaction.
    pub soft_limit: u32,
    /// Usage sent to the model never exceeds this.
    pub hard_limit: u32,
    pub max_iterations: u32,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            soft_limit: 180_000,
            hard_limit: 200_000,
            max_iterations: 300,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompactionSettings {
    /// Most recent turns kept verbatim.
    pub tail_turns: usize,
    /// Output cap for the summarization call.
    pub summary_max_tokens: u32,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            tail_turns: 10,
            summary_max_tokens: 4096,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckpointSettings {
    /// Completed iterations between checkpoints.
    pub cadence: u32,
    pub write_timeout_secs: u64,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            cadence: 10,
            write_timeout_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolSettings {
    pub fast_timeout_secs: u64,
    pub slow_timeout_secs: u64,
    pub network_timeout_secs: u64,
    /// Tool output larger than this is truncated before entering the transcript.
    pub max_output_bytes: usize,
    pub web_search_results: u32,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            fast_timeout_secs: 30,
            slow_timeout_secs: 120,
            network_timeout_secs: 60,
            max_output_bytes: 100_000,
            web_search_results: 5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathSettings {
    /// Parent folder of all project folders.
    pub output_dir: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            output_dir: "output".into(),
        }
    }
}
