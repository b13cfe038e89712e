//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::ScribeSettings;

/// Resolve the path to the settings file (`~/.scribe/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".scribe").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ScribeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides, then validate.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ScribeSettings> {
    let mut settings = read_layers(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_layers(path: &Path) -> Result<ScribeSettings> {
    let defaults = serde_json::to_value(ScribeSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SCRIBE_*` environment overrides. Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut ScribeSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from any key lookup; split out so tests need not touch the process env.
pub fn apply_overrides<F>(settings: &mut ScribeSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let u32_in = |name: &str, min: u32, max: u32| {
        let val = lookup(name)?;
        let parsed = parse_u64_range(&val, min as u64, max as u64).map(|n| n as u32);
        if parsed.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        parsed
    };

    if let Some(v) = string("SCRIBE_MODEL") {
        settings.model.model = v;
    }
    if let Some(v) = string("SCRIBE_BASE_URL") {
        settings.model.base_url = v;
    }
    if let Some(v) = string("SCRIBE_OUTPUT_DIR") {
        settings.paths.output_dir = v;
    }
    if let Some(v) = u32_in("SCRIBE_MAX_ITERATIONS", 1, 100_000) {
        settings.budget.max_iterations = v;
    }
    if let Some(v) = u32_in("SCRIBE_SOFT_LIMIT", 1, 10_000_000) {
        settings.budget.soft_limit = v;
    }
    if let Some(v) = u32_in("SCRIBE_HARD_LIMIT", 1, 10_000_000) {
        settings.budget.hard_limit = v;
    }
    if let Some(v) = u32_in("SCRIBE_CHECKPOINT_CADENCE", 1, 100_000) {
        settings.checkpoints.cadence = v;
    }
    if let Some(v) = u32_in("SCRIBE_TAIL_TURNS", 1, 10_000) {
        settings.compaction.tail_turns = v as usize;
    }
    if let Some(v) = u32_in("SCRIBE_MODEL_TIMEOUT_SECS", 1, 3600) {
        settings.model.attempt_timeout_secs = v as u64;
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"budget": {"softLimit": 1, "hardLimit": 2}});
        let source = serde_json::json!({"budget": {"softLimit": 5}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["budget"]["softLimit"], 5);
        assert_eq!(merged["budget"]["hardLimit"], 2);
    }

    #[test]
    fn merge_skips_nulls_and_replaces_arrays() {
        let target = serde_json::json!({"a": 1, "list": [1, 2, 3]});
        let source = serde_json::json!({"a": null, "list": [9]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["list"], serde_json::json!([9]));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_layers(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.budget.max_iterations, 300);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"budget": {"softLimit": 1000, "hardLimit": 1200}, "compaction": {"tailTurns": 2}}"#,
        )
        .unwrap();
        let settings = read_layers(&path).unwrap();
        assert_eq!(settings.budget.soft_limit, 1000);
        assert_eq!(settings.budget.hard_limit, 1200);
        assert_eq!(settings.compaction.tail_turns, 2);
        assert_eq!(settings.checkpoints.cadence, 10);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(read_layers(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn invalid_combination_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"budget": {"softLimit": 5000, "hardLimit": 100}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn overrides_apply_and_bad_values_are_ignored() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SCRIBE_MODEL", "kimi-k2"),
            ("SCRIBE_MAX_ITERATIONS", "25"),
            ("SCRIBE_CHECKPOINT_CADENCE", "0"),
            ("SCRIBE_SOFT_LIMIT", "lots"),
            ("SCRIBE_BASE_URL", ""),
            ("SCRIBE_TAIL_TURNS", "0"),
        ]);
        let mut settings = ScribeSettings::default();
        apply_overrides(&mut settings, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(settings.model.model, "kimi-k2");
        assert_eq!(settings.budget.max_iterations, 25);
        assert_eq!(settings.checkpoints.cadence, 10);
        assert_eq!(settings.budget.soft_limit, 180_000);
        assert_eq!(settings.model.base_url, "https://api.moonshot.ai/v1");
        assert_eq!(settings.compaction.tail_turns, 10);
    }

    #[test]
    fn range_parsing() {
        assert_eq!(parse_u64_range("10", 1, 100), Some(10));
        assert_eq!(parse_u64_range(" 7 ", 1, 100), Some(7));
        assert_eq!(parse_u64_range("0", 1, 100), None);
        assert_eq!(parse_u64_range("101", 1, 100), None);
        assert_eq!(parse_u64_range("-3", 0, 100), None);
    }
}
