//! Global configuration parsing and validation.
//!
//! The configuration is read once at startup and passed by value (behind an
//! `Arc`) to whichever endpoint the process runs. Nothing in the library
//! reads configuration from global state.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::mode::RunMode;
use crate::path_safety::validate_component;
use crate::protocol::MAX_LOG_STREAMS;
use crate::{AppError, Result};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/glog/config.toml";

fn default_logdir() -> PathBuf {
    PathBuf::from("/var/log/glog")
}

fn default_debuglog() -> String {
    "glog.debug".into()
}

fn default_connect_timeout_seconds() -> u64 {
    15
}

fn default_handshake_timeout_seconds() -> u64 {
    30
}

fn default_rotation_retry_interval_ms() -> u64 {
    50
}

fn default_rotation_max_attempts() -> u32 {
    50
}

fn default_queue_capacity() -> usize {
    1024
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Whether this process is the collector or an agent.
    pub mode: RunMode,
    /// Process identity. Agents send it during the handshake.
    pub name: String,
    /// Address to bind (server) or dial (client), e.g. `127.0.0.1:7070`.
    pub addr: String,
    /// Enable debug-level diagnostics.
    #[serde(default)]
    pub debug: bool,
    /// Base directory for collected logs and the diagnostic log.
    #[serde(default = "default_logdir")]
    pub logdir: PathBuf,
    /// File name of the local diagnostic log inside `logdir`.
    #[serde(default = "default_debuglog")]
    pub debuglog: String,
    /// Label → local path of files to tail (client mode only).
    #[serde(default)]
    pub logfiles: BTreeMap<String, PathBuf>,
    /// Upper bound for establishing the agent connection.
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    /// Upper bound for a peer to complete the handshake.
    #[serde(default = "default_handshake_timeout_seconds")]
    pub handshake_timeout_seconds: u64,
    /// Fixed delay between existence checks after a rotation.
    #[serde(default = "default_rotation_retry_interval_ms")]
    pub rotation_retry_interval_ms: u64,
    /// Existence checks before a rotated file's tailer gives up.
    #[serde(default = "default_rotation_max_attempts")]
    pub rotation_max_attempts: u32,
    /// Capacity of the tailer → sender queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("failed to read config {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the local diagnostic log file.
    #[must_use]
    pub fn debuglog_path(&self) -> PathBuf {
        self.logdir.join(&self.debuglog)
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Handshake timeout as a [`Duration`].
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }

    /// Rotation retry policy derived from the tunables.
    #[must_use]
    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy {
            interval: Duration::from_millis(self.rotation_retry_interval_ms),
            max_attempts: self.rotation_max_attempts,
        }
    }

    /// Re-run validation, e.g. after a CLI override changed `mode`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::Config("name must not be empty".into()));
        }

        if self.addr.trim().is_empty() {
            return Err(AppError::Config("addr must not be empty".into()));
        }

        validate_component("name", &self.name)
            .map_err(|err| AppError::Config(err.to_string()))?;

        if self.debuglog.trim().is_empty() {
            return Err(AppError::Config("debuglog must not be empty".into()));
        }

        if self.rotation_max_attempts == 0 {
            return Err(AppError::Config(
                "rotation_max_attempts must be greater than zero".into(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(AppError::Config(
                "queue_capacity must be greater than zero".into(),
            ));
        }

        if self.mode == RunMode::Client {
            if self.logfiles.is_empty() {
                return Err(AppError::Config(
                    "logfiles must not be empty in client mode".into(),
                ));
            }
            if self.logfiles.len() > MAX_LOG_STREAMS {
                return Err(AppError::Config(format!(
                    "at most {MAX_LOG_STREAMS} logfiles are supported, got {}",
                    self.logfiles.len()
                )));
            }
            for label in self.logfiles.keys() {
                validate_component("log label", label)
                    .map_err(|err| AppError::Config(err.to_string()))?;
            }
        }

        Ok(())
    }
}

/// Fixed-interval retry policy used while a rotated file is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Delay between attempts.
    pub interval: Duration,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(default_rotation_retry_interval_ms()),
            max_attempts: default_rotation_max_attempts(),
        }
    }
}
