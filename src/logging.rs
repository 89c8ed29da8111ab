//! Diagnostic logging via `tracing`, written to stderr.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    /// One JSON object per event, for log collectors.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!(
                "ログ形式が不正です: {other}（pretty|compact|json を指定してください）"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
    pub with_target: bool,
    pub with_thread_ids: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: String::from("warn"),
            format: LogFormat::Compact,
            with_target: false,
            with_thread_ids: false,
        }
    }
}

impl LogSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Scans run on background threads; thread ids tell them apart.
    pub fn with_thread_ids(mut self) -> Self {
        self.with_thread_ids = true;
        self
    }

    pub fn with_target(mut self) -> Self {
        self.with_target = true;
        self
    }
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level. Calling this twice is harmless; the second call is
/// ignored.
pub fn init(settings: &LogSettings) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let _ = match settings.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(settings.with_target)
                    .with_thread_ids(settings.with_thread_ids),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_target(settings.with_target)
                    .with_thread_ids(settings.with_thread_ids),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_target(settings.with_target)
                    .with_thread_ids(settings.with_thread_ids),
            )
            .try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_builder() {
        let s = LogSettings::new()
            .level("debug")
            .format(LogFormat::Json)
            .with_thread_ids();
        assert_eq!(s.level, "debug");
        assert_eq!(s.format, LogFormat::Json);
        assert!(s.with_thread_ids);
        assert!(!s.with_target);
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
