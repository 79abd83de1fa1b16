//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`QuireSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `QUIRE_*` environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::QuireSettings;

/// Resolve the default settings path (`~/.quire/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".quire").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<QuireSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<QuireSettings> {
    let defaults = serde_json::to_value(QuireSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: QuireSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, everything else is replaced by `source`,
/// and nulls in `source` keep the target value.
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

/// Apply overrides read through `lookup` (the process environment in production).
///
/// Out-of-range or unparsable values are logged and ignored.
pub fn apply_overrides(settings: &mut QuireSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let number = |name: &str, min: u64, max: u64| {
        let raw = lookup(name)?;
        let parsed = parse_u64_range(&raw, min, max);
        if parsed.is_none() {
            warn!(key = name, value = %raw, "invalid numeric env var, ignoring");
        }
        parsed
    };

    // ── API ─────────────────────────────────────────────────────────
    if let Some(v) = string("QUIRE_BASE_URL") {
        settings.api.base_url = v;
    }
    if let Some(v) = string("QUIRE_API_TOKEN") {
        settings.api.token = Some(v);
    }
    if let Some(v) = number("QUIRE_TIMEOUT_MS", 100, 600_000) {
        settings.api.timeout_ms = v;
    }
    if let Some(v) = number("QUIRE_HISTORY_PAGE_SIZE", 1, 500) {
        settings.api.history_page_size = v as u32;
    }

    // ── Playback ────────────────────────────────────────────────────
    if let Some(v) = number("QUIRE_CYCLE_INTERVAL_MS", 1, 60_000) {
        settings.playback.cycle_interval_ms = v;
    }
    if let Some(v) = number("QUIRE_CHUNK_CHARS", 1, 4096) {
        settings.playback.chunk_chars = v as usize;
    }
    if let Some(v) = number("QUIRE_CHUNK_DELAY_MS", 0, 10_000) {
        settings.playback.chunk_delay_ms = v;
    }
    if let Some(v) = number("QUIRE_SCROLL_EVERY_CHUNKS", 0, 10_000) {
        settings.playback.scroll_every_chunks = v as usize;
    }
    if let Some(v) = number("QUIRE_STALL_TIMEOUT_MS", 0, 3_600_000) {
        settings.playback.stall_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("QUIRE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(raw) = lookup("QUIRE_LOG_JSON") {
        match parse_bool(&raw) {
            Some(v) => settings.logging.json = v,
            None => warn!(key = "QUIRE_LOG_JSON", value = %raw, "invalid boolean env var, ignoring"),
        }
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
