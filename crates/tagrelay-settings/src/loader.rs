//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tagrelay_core::logging::LogFormat;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::RelaySettings;

/// Environment variable naming the settings file.
pub const CONFIG_ENV: &str = "CONFIG";

/// Resolve the settings file path from the `CONFIG` environment variable.
pub fn settings_path() -> Option<PathBuf> {
    read_env_string(CONFIG_ENV).map(PathBuf::from)
}

/// Load settings from the `CONFIG` path (if any) with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    match settings_path() {
        Some(path) => load_settings_from_path(&path),
        None => {
            let mut settings = RelaySettings::default();
            apply_env_overrides(&mut settings);
            validate(&settings)?;
            Ok(settings)
        }
    }
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    load_with(path, |name| std::env::var(name).ok())
}

fn load_with(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_env_overrides_from(&mut settings, lookup);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_env_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` to loaded settings.
///
/// Integers must be valid and within range; invalid values are warned
/// about and ignored (fall back to file/default). The legacy
/// `MASTER_NOTIFICATION_SERVER_*` names are read first so the
/// `PARENT_URL` / `TAGRELAY_*` names win when both are set.
pub fn apply_env_overrides_from(
    settings: &mut RelaySettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.u16("WEBSOCKET_PORT", 1, 65535) {
        settings.server.websocket_port = v;
    }
    if let Some(v) = env.u16("HTTP_PORT", 1, 65535) {
        settings.server.rest_port = v;
    }
    if let Some(v) = env.string("TAGRELAY_HOST") {
        settings.server.host = v;
    }

    // ── Uplink ──────────────────────────────────────────────────────
    if let Some(v) = env.string("MASTER_NOTIFICATION_SERVER_HOST") {
        settings.uplink.parent_url = Some(v);
    }
    if let Some(v) = env.string("PARENT_URL") {
        settings.uplink.parent_url = Some(v);
    }
    if let Some(v) = env.string("MASTER_NOTIFICATION_SERVER_ATTRIBUTES") {
        let keys = parse_key_list(&v);
        if keys.is_empty() {
            tracing::warn!(key = "MASTER_NOTIFICATION_SERVER_ATTRIBUTES", value = %v, "no attribute keys, ignoring");
        } else {
            settings.uplink.root_attributes = keys;
        }
    }
    if let Some(v) = env.u64("TAGRELAY_PING_INTERVAL_SECS", 1, 3600) {
        settings.uplink.ping_interval_secs = v;
    }
    if let Some(v) = env.u64("TAGRELAY_UPLINK_RETRIES", 0, 1000) {
        settings.uplink.max_retries = u32::try_from(v).unwrap_or(u32::MAX);
    }
    if let Some(v) = env.u64("TAGRELAY_RECONNECT_BACKOFF_MS", 0, 600_000) {
        settings.uplink.reconnect_backoff_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("TAGRELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("TAGRELAY_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(format) => settings.logging.format = format,
            None => tracing::warn!(key = "TAGRELAY_LOG_FORMAT", value = %v, "invalid log format env var, ignoring"),
        }
    }
}

/// Reject settings that cannot be served.
pub fn validate(settings: &RelaySettings) -> Result<()> {
    if settings.server.websocket_port == settings.server.rest_port
        && settings.server.websocket_port != 0
    {
        return Err(SettingsError::InvalidValue(format!(
            "websocket port and rest port are both {}",
            settings.server.websocket_port
        )));
    }
    if settings.uplink.ping_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "uplink ping interval must be at least one second".to_string(),
        ));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Split a `;`-separated key list, dropping blanks.
pub fn parse_key_list(val: &str) -> Vec<String> {
    val.split(';')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

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

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.string(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
