use std::time::Duration;

use quire_settings::{ApiSettings, PlaybackSettings, QuireSettings};

/// Runtime configuration for the playback scheduler and resync path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackConfig {
    pub cycle_interval: Duration,
    pub chunk_chars: usize,
    pub chunk_delay: Duration,
    /// `0` disables scroll signals.
    pub scroll_every_chunks: usize,
    /// `None` disables the stall timeout.
    pub stall_timeout: Option<Duration>,
    pub history_page_size: u32,
    pub signal_capacity: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self::from_settings(&PlaybackSettings::default(), &ApiSettings::default())
    }
}

impl PlaybackConfig {
    pub fn from_settings(playback: &PlaybackSettings, api: &ApiSettings) -> Self {
        Self {
            cycle_interval: Duration::from_millis(playback.cycle_interval_ms.max(1)),
            chunk_chars: playback.chunk_chars.max(1),
            chunk_delay: Duration::from_millis(playback.chunk_delay_ms),
            scroll_every_chunks: playback.scroll_every_chunks,
            stall_timeout: (playback.stall_timeout_ms > 0)
                .then(|| Duration::from_millis(playback.stall_timeout_ms)),
            history_page_size: api.history_page_size.max(1),
            signal_capacity: 256,
        }
    }

    /// No pacing delays; fragments are revealed in a single pass.
    pub fn instant() -> Self {
        Self {
            chunk_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

impl From<&QuireSettings> for PlaybackConfig {
    fn from(settings: &QuireSettings) -> Self {
        Self::from_settings(&settings.playback, &settings.api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_settings() {
        let config = PlaybackConfig::default();
        assert_eq!(config.cycle_interval, Duration::from_millis(200));
        assert_eq!(config.chunk_chars, 2);
        assert_eq!(config.chunk_delay, Duration::from_millis(30));
        assert_eq!(config.scroll_every_chunks, 13);
        assert_eq!(config.stall_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.history_page_size, 20);
    }

    #[test]
    fn zero_stall_timeout_disables() {
        let mut settings = QuireSettings::default();
        settings.playback.stall_timeout_ms = 0;
        settings.playback.chunk_chars = 0;
        let config = PlaybackConfig::from(&settings);
        assert_eq!(config.stall_timeout, None);
        assert_eq!(config.chunk_chars, 1);
    }
}
