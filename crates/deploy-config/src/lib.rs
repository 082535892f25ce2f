//! `deploy.toml` configuration and tracing setup.

mod logging;

use std::path::{Path, PathBuf};
use std::time::Duration;

use deploy_jdwp::SessionSettings;
use serde::{Deserialize, Serialize};

pub use logging::init_tracing;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    pub logging: LoggingConfig,
    pub session: SessionConfig,
    pub device: DeviceConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` quotes the offending source snippet.
        ConfigError::Toml(err.message().to_owned())
    }
}

impl DeployConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to this file as well. If it cannot be opened, file
    /// logging is skipped and the other sinks stay active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    /// Directives for `EnvFilter`: the configured level (`info` when blank),
    /// followed by `RUST_LOG` so that the environment wins on conflicts.
    fn directives(&self, rust_log: Option<&str>) -> String {
        let level = match self.level.trim() {
            "" => "info",
            level => level,
        };
        match rust_log.map(str::trim).filter(|env| !env.is_empty()) {
            Some(env) => format!("{level},{env}"),
            None => level.to_owned(),
        }
    }

    /// The effective filter. Unparseable directives fall back to `info`.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let rust_log = std::env::var("RUST_LOG").ok();
        tracing_subscriber::EnvFilter::try_new(self.directives(rust_log.as_deref()))
            .or_else(|_| tracing_subscriber::EnvFilter::try_new(self.directives(None)))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

/// How debugger connections compete for a process's JDWP session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// How often a queued debugger rechecks whether its peer is still there.
    pub poll_interval_ms: u64,
    /// Devices below this API level refuse a second debugger outright
    /// instead of queueing it.
    pub legacy_api_threshold: u32,
}

impl SessionConfig {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            legacy_api_threshold: self.legacy_api_threshold,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let defaults = SessionSettings::default();
        Self {
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            legacy_api_threshold: defaults.legacy_api_threshold,
        }
    }
}

/// The device simulated by `deploy fake-device`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    pub serial: String,
    pub api_level: u32,
    /// Supported ABIs, most preferred first.
    pub abis: Vec<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial: "emulator-5554".to_owned(),
            api_level: 30,
            abis: vec!["arm64-v8a".to_owned(), "armeabi-v7a".to_owned()],
        }
    }
}
