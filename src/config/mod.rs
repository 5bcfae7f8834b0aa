//! Typed configuration.
//!
//! Secrets and endpoints come from the environment (`.env` in local dev,
//! an EnvironmentFile in production). Engine tuning may also come from a
//! TOML file; environment variables win over file values. Everything is
//! validated once at startup.

use std::path::Path;
use std::str::FromStr;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::DEFAULT_MAX_EXTENSIONS;
use crate::notify::RetryPolicy;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub engine: EngineConfig,
}

/// Knobs for the assignment engine and its sweep loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Seconds between sweep passes.
    pub sweep_interval_secs: u64,
    /// Extensions granted to an empty window before auto-assign gives up.
    pub max_extensions: u32,
    /// Window used when a task is opened without one.
    pub default_window_minutes: u32,
    /// Delivery attempts per notification, the first included.
    pub notify_max_attempts: u32,
    /// Delay before the first notification retry; doubles per attempt.
    pub notify_retry_base_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            max_extensions: DEFAULT_MAX_EXTENSIONS,
            default_window_minutes: 60,
            notify_max_attempts: 5,
            notify_retry_base_secs: 30,
        }
    }
}

impl EngineConfig {
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.notify_max_attempts,
            initial_interval: chrono::Duration::seconds(
                i64::try_from(self.notify_retry_base_secs).unwrap_or(i64::MAX / 1000),
            ),
            ..RetryPolicy::default()
        }
    }

    /// Parse the `[engine]` table of a TOML file.
    pub fn from_toml(content: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct File {
            #[serde(default)]
            engine: EngineConfig,
        }
        let file: File =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad engine config: {e}")))?;
        file.engine.validate()?;
        Ok(file.engine)
    }

    /// Apply `SWEEP_INTERVAL_SECS` and friends over the current values.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = parsed_var("SWEEP_INTERVAL_SECS")? {
            self.sweep_interval_secs = v;
        }
        if let Some(v) = parsed_var("MAX_EXTENSIONS")? {
            self.max_extensions = v;
        }
        if let Some(v) = parsed_var("DEFAULT_WINDOW_MINUTES")? {
            self.default_window_minutes = v;
        }
        if let Some(v) = parsed_var("NOTIFY_MAX_ATTEMPTS")? {
            self.notify_max_attempts = v;
        }
        if let Some(v) = parsed_var("NOTIFY_RETRY_BASE_SECS")? {
            self.notify_retry_base_secs = v;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(Error::Config("sweep_interval_secs must be at least 1".into()));
        }
        if self.default_window_minutes == 0 {
            return Err(Error::Config("default_window_minutes must be at least 1".into()));
        }
        if self.notify_max_attempts == 0 {
            return Err(Error::Config("notify_max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from environment variables only.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Load engine tuning from `engine_file` (if any), then the environment.
    pub fn load(engine_file: Option<&Path>) -> Result<Self> {
        let mut engine = match engine_file {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                EngineConfig::from_toml(&content)?
            }
            None => EngineConfig::default(),
        };
        engine.apply_env()?;

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            engine,
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {name}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}
