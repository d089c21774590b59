use std::{
    fmt::Display,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tokio::{fs::read_to_string, io};
use tracing::{info, warn};

use crate::{timer::SpeedLimits, tracing::LogLevel, TimerError};

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TimerConfig {
    /// Upper bound on the speed; the lower bound is its inverse.
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
    #[serde(default = "default_initial_speed")]
    pub initial_speed: f64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            max_speed: default_max_speed(),
            initial_speed: default_initial_speed(),
        }
    }
}

const fn default_max_speed() -> f64 {
    10.0
}

const fn default_initial_speed() -> f64 {
    1.0
}

impl TimerConfig {
    pub fn limits(&self) -> Result<SpeedLimits, TimerError> {
        SpeedLimits::new(self.max_speed)
    }

    /// Validates the limits and that the initial speed lies within them.
    pub fn check(&self) -> Result<SpeedLimits, TimerError> {
        let limits = self.limits()?;
        limits.check(self.initial_speed)?;
        Ok(limits)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub log_level: Option<LogLevel>,
    #[serde(default = "default_ansi_colors")]
    pub ansi_colors: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: Default::default(),
            ansi_colors: default_ansi_colors(),
        }
    }
}

const fn default_ansi_colors() -> bool {
    true
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    pub async fn from_file(file: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let meta = std::fs::metadata(&file)?;
        let perm = meta.permissions();

        if perm.mode() as libc::mode_t & libc::S_IWOTH != 0 {
            warn!("Unrestricted config file permissions: Others can write.");
        }

        let contents = read_to_string(file).await?;
        Ok(toml::de::from_str(&contents)?)
    }

    /// Loads the given file, or the default configuration when there is none.
    pub async fn from_args(file: Option<impl AsRef<Path>>) -> Result<Config, ConfigError> {
        match file {
            Some(f) => {
                let path: PathBuf = f.as_ref().into();
                info!(?path, "using config file");
                Config::from_file(path).await
            }
            None => {
                info!("no config file given, using default config");
                Ok(Config::default())
            }
        }
    }

    /// Check that the config describes a usable timer.
    pub fn check(&self) -> Result<(), ConfigError> {
        let limits = self.timer.check()?;
        info!(
            min_speed = limits.min(),
            max_speed = limits.max(),
            initial_speed = self.timer.initial_speed,
            "timer config ok"
        );
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Toml(toml::de::Error),
    Timer(TimerError),
}

impl std::error::Error for ConfigError {}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error while reading config: {e}"),
            Self::Toml(e) => write!(f, "config toml parsing error: {e}"),
            Self::Timer(e) => write!(f, "invalid timer config: {e}"),
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Toml(value)
    }
}

impl From<TimerError> for ConfigError {
    fn from(value: TimerError) -> Self {
        Self::Timer(value)
    }
}
