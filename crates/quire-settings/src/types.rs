//! Settings types with compiled defaults.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuireSettings {
    /// REST endpoint settings.
    pub api: ApiSettings,
    /// Stream playback tuning.
    pub playback: PlaybackSettings,
    /// Logging output.
    pub logging: LoggingSettings,
}

impl QuireSettings {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.playback.chunk_chars == 0 {
            return Err(SettingsError::InvalidValue("playback.chunkChars must be at least 1".into()));
        }
        if self.playback.cycle_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "playback.cycleIntervalMs must be at least 1".into(),
            ));
        }
        if self.api.history_page_size == 0 {
            return Err(SettingsError::InvalidValue("api.historyPageSize must be at least 1".into()));
        }
        Ok(())
    }
}

/// REST endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL of the chat REST API.
    pub base_url: String,
    /// Bearer token attached to every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Messages per history page.
    pub history_page_size: u32,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:33033".to_string(),
            token: None,
            timeout_ms: 15_000,
            history_page_size: 20,
        }
    }
}

/// Presentation-tuning parameters for the playback scheduler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaybackSettings {
    /// Delay between drain cycles.
    pub cycle_interval_ms: u64,
    /// Characters revealed per typing step.
    pub chunk_chars: usize,
    /// Delay between typing steps.
    pub chunk_delay_ms: u64,
    /// Emit a scroll-to-bottom signal every N typing steps.
    pub scroll_every_chunks: usize,
    /// Force a resync when the queue head stays blocked this long. `0` disables.
    pub stall_timeout_ms: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 200,
            chunk_chars: 2,
            chunk_delay_ms: 30,
            scroll_every_chunks: 13,
            stall_timeout_ms: 10_000,
        }
    }
}

/// Logging output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
