//! Process level defaults for the `waitkit` command line tool.
//!
//! Values come from (lowest precedence first): built-in defaults, the TOML
//! file at `WAITKIT_CONFIG` (or `<config dir>/waitkit/config.toml`), then the
//! `WAITKIT_STARTUP_TIMEOUT_MS` / `WAITKIT_POLL_INTERVAL_MS` environment
//! variables. Explicit CLI flags override all of them.

pub mod defaults;

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_PATH_ENV: &str = "WAITKIT_CONFIG";
pub const STARTUP_TIMEOUT_ENV: &str = "WAITKIT_STARTUP_TIMEOUT_MS";
pub const POLL_INTERVAL_ENV: &str = "WAITKIT_POLL_INTERVAL_MS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {name}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// Overall budget when no `--timeout-ms` is given.
    pub startup_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Probe `127.0.0.1` instead of `localhost` for HTTP checks.
    pub force_ipv4_localhost: bool,
}

impl WaitConfig {
    pub fn default_path() -> PathBuf {
        if let Ok(path) = env::var(CONFIG_PATH_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("waitkit")
            .join("config.toml")
    }

    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::default_path())?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a specific file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_millis(STARTUP_TIMEOUT_ENV)? {
            self.startup_timeout_ms = value;
        }
        if let Some(value) = env_millis(POLL_INTERVAL_ENV)? {
            self.poll_interval_ms = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.startup_timeout_ms == 0 {
            return Err(ConfigError::Zero("startup_timeout_ms"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Zero("poll_interval_ms"));
        }
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn env_millis(name: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
        Err(_) => Ok(None),
    }
}
