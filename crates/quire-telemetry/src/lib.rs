use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "quire_stream" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of the human-readable formatter.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build a config from a level name, falling back to INFO on unknown names.
    pub fn from_level_name(level: &str, json: bool) -> Self {
        Self {
            log_level: Level::from_str(level).unwrap_or(Level::INFO),
            module_levels: Vec::new(),
            json,
        }
    }

    pub fn with_module_level(mut self, module: impl Into<String>, level: Level) -> Self {
        self.module_levels.push((module.into(), level));
        self
    }

    /// `EnvFilter` directive string for this config.
    pub fn filter_directive(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Initialize the global tracing subscriber. Call once at startup.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry().with(fmt_layer).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_is_info() {
        assert_eq!(TelemetryConfig::default().filter_directive(), "info");
    }

    #[test]
    fn module_levels_appended() {
        let config = TelemetryConfig::default()
            .with_module_level("quire_stream", Level::DEBUG)
            .with_module_level("reqwest", Level::WARN);
        assert_eq!(config.filter_directive(), "info,quire_stream=debug,reqwest=warn");
    }

    #[test]
    fn level_name_parsing() {
        assert_eq!(TelemetryConfig::from_level_name("debug", false).log_level, Level::DEBUG);
        assert_eq!(TelemetryConfig::from_level_name("nonsense", true).log_level, Level::INFO);
    }

    #[test]
    fn second_init_reports_false() {
        let config = TelemetryConfig::default();
        let _first = init_telemetry(&config);
        assert!(!init_telemetry(&config));
    }
}
