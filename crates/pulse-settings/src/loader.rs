//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PulseSettings::default()`]
//! 2. If `~/.pulse/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `PULSE_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{LogFormat, PulseSettings};

/// Resolve the path to the settings file (`~/.pulse/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pulse").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PulseSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// validation are errors.
pub fn load_settings_from_path(path: &Path) -> Result<PulseSettings> {
    let mut settings = read_layers(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn read_layers(path: &Path) -> Result<PulseSettings> {
    let defaults = serde_json::to_value(PulseSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
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

/// Apply `PULSE_*` environment variable overrides.
///
/// Numbers must parse and fall within range; invalid values are ignored with
/// a warning and the file/default value stands.
pub fn apply_env_overrides(settings: &mut PulseSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup. `apply_env_overrides` passes the
/// process environment; tests pass a map.
pub fn apply_overrides(settings: &mut PulseSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("PULSE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("PULSE_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("PULSE_MAX_CONNECTIONS", 1, 100_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.u64("PULSE_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = env.u64("PULSE_HEARTBEAT_TIMEOUT_SECS", 1, 7200) {
        settings.server.heartbeat_timeout_secs = v;
    }
    if let Some(v) = env.usize("PULSE_MAX_MESSAGE_SIZE", 1024, 256 * 1024 * 1024) {
        settings.server.max_message_size = v;
    }

    // ── Window ──────────────────────────────────────────────────────
    if let Some(v) = env.f64("PULSE_FRAME_RATE", 1.0, 240.0) {
        settings.window.frame_rate = v;
    }
    if let Some(v) = env.usize("PULSE_MIN_WINDOW", 1, 100_000) {
        settings.window.min_window = v;
    }
    if let Some(v) = env.usize("PULSE_MAX_WINDOW", 1, 100_000) {
        settings.window.max_window = v;
    }
    if let Some(v) = env.usize("PULSE_ESTIMATE_WINDOW", 1, 100_000) {
        settings.window.estimate_window = v;
    }
    if let Some(v) = env.u64("PULSE_REPORT_INTERVAL", 1, 100_000) {
        settings.window.report_interval = v;
    }
    if let Some(v) = env.usize("PULSE_FULL_WINDOW", 1, 100_000) {
        settings.window.full_window = v;
    }

    // ── Estimator ───────────────────────────────────────────────────
    if let Some(v) = env.u64("PULSE_ESTIMATE_TIMEOUT_MS", 1, 600_000) {
        settings.estimator.timeout_ms = v;
    }
    if let Some(v) = env.f64("PULSE_MIN_QUALITY", 0.0, 1.0) {
        settings.estimator.min_quality = v;
    }
    if let Some(v) = env.u64("PULSE_MAX_FRAME_PIXELS", 1, 64 * 1024 * 1024) {
        settings.estimator.max_frame_pixels = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("PULSE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("PULSE_LOG_FORMAT") {
        match v.parse::<LogFormat>() {
            Ok(format) => settings.logging.format = format,
            Err(e) => warn!(key = "PULSE_LOG_FORMAT", value = %v, error = %e, "ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a finite `f64` within a range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.trim().parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

// ── Lookup wrappers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }

    fn f64(&self, name: &str, min: f64, max: f64) -> Option<f64> {
        self.parsed(name, "f64", |v| parse_f64_range(v, min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8001, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(
            serde_json::json!({"a": {"nested": true}}),
            serde_json::json!({"a": 42}),
        );
        assert_eq!(merged["a"], 42);
    }

    // ── file layers ─────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = read_layers(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings, PulseSettings::default());
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9100}, "window": {"reportInterval": 15, "minWindow": 90}}"#,
        )
        .unwrap();

        let settings = read_layers(&path).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.window.report_interval, 15);
        assert_eq!(settings.window.min_window, 90);
        assert_eq!(settings.window.estimate_window, 300);
        assert_eq!(settings.server.max_connections, 64);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let err = read_layers(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"window": {"minWindow": 400}}"#).unwrap();

        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)), "got {err:?}");
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut settings = PulseSettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("PULSE_PORT", "9001"),
                ("PULSE_HOST", "127.0.0.1"),
                ("PULSE_REPORT_INTERVAL", "10"),
                ("PULSE_FRAME_RATE", "25"),
                ("PULSE_MIN_QUALITY", "0.3"),
                ("PULSE_MAX_FRAME_PIXELS", "307200"),
                ("PULSE_LOG_FORMAT", "text"),
            ]),
        );
        assert_eq!(settings.server.port, 9001);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.window.report_interval, 10);
        assert_eq!(settings.window.frame_rate, 25.0);
        assert_eq!(settings.estimator.min_quality, 0.3);
        assert_eq!(settings.estimator.max_frame_pixels, 640 * 480);
        assert_eq!(settings.logging.format, LogFormat::Text);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = PulseSettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("PULSE_PORT", "0"),
                ("PULSE_REPORT_INTERVAL", "often"),
                ("PULSE_MIN_QUALITY", "2"),
                ("PULSE_MAX_FRAME_PIXELS", "0"),
                ("PULSE_LOG_FORMAT", "xml"),
                ("PULSE_HOST", ""),
            ]),
        );
        assert_eq!(settings, PulseSettings::default());
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_u16_bounds() {
        assert_eq!(parse_u16_range("8001", 1, 65535), Some(8001));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("99999", 1, 65535), None);
        assert_eq!(parse_u16_range(" 80 ", 1, 65535), Some(80));
    }

    #[test]
    fn parse_u64_and_usize_bounds() {
        assert_eq!(parse_u64_range("5000", 1, 600_000), Some(5000));
        assert_eq!(parse_u64_range("abc", 1, 600_000), None);
        assert_eq!(parse_usize_range("0", 1, 10), None);
        assert_eq!(parse_usize_range("10", 1, 10), Some(10));
    }

    #[test]
    fn parse_f64_bounds() {
        assert_eq!(parse_f64_range("0.5", 0.0, 1.0), Some(0.5));
        assert_eq!(parse_f64_range("NaN", 0.0, 1.0), None);
        assert_eq!(parse_f64_range("inf", 0.0, f64::MAX), None);
        assert_eq!(parse_f64_range("-1", 0.0, 1.0), None);
    }
}
