use std::str::FromStr;

use serde::Deserialize;
use tracing::metadata::LevelFilter;

/// Verbosity of the stderr log, set by `--log-level` or `log-level` in the
/// `[observability]` table.
#[derive(Debug, Default, Copy, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Every scheduled and cancelled deadline.
    Trace = 0,
    /// Sessions starting, stopping and speed changes.
    Debug = 1,
    #[default]
    Info = 2,
    Warn = 3,
    Error = 4,
}

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownLogLevel;

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(UnknownLogLevel),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        LevelFilter::from_level(value.into())
    }
}

/// Builds the subscriber used by the binary. Logs go to stderr so they do not
/// mix with the countdown status printed on stdout.
pub fn tracing_init(
    level: impl Into<LevelFilter>,
    ansi_colors: bool,
) -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(ansi_colors)
        .with_writer(std::io::stderr)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!("trace".parse(), Ok(LogLevel::Trace));
        assert_eq!("warn".parse(), Ok(LogLevel::Warn));
        assert_eq!("WARN".parse::<LogLevel>(), Err(UnknownLogLevel));
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LevelFilter::from(LogLevel::Error), LevelFilter::ERROR);
    }
}
