//! Typed configuration.
//!
//! Process settings come from environment variables and fail fast when a
//! required one is missing. Runtime tuning (capacity, debounce, retry and
//! stall bounds) comes from an optional TOML file with per-field defaults.
//! Sensitive values are wrapped in `secrecy::SecretString` to prevent log leaks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Optional TOML file with [`RuntimeConfig`] overrides.
    pub runtime_config_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            runtime_config_path: std::env::var("CANVAS_RUNTIME_CONFIG").ok().map(PathBuf::from),
        })
    }

    /// The runtime tuning this process should use: the configured file if
    /// any, defaults otherwise.
    pub fn runtime(&self) -> Result<RuntimeConfig> {
        match &self.runtime_config_path {
            Some(path) => RuntimeConfig::load(path),
            None => Ok(RuntimeConfig::default()),
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Tuning knobs for the runtime manager, persistence queue and hydration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Maximum number of hot workspaces before LRU eviction kicks in.
    pub max_hot: usize,
    /// Trailing debounce window for non-immediate saves.
    pub debounce_ms: u64,
    /// A save running longer than this releases its lane with a warning.
    pub stall_timeout_ms: u64,
    /// Transport failures tolerated per save before surfacing `Unsaved`.
    pub max_transport_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Reconcile-and-retry rounds after a version conflict.
    pub conflict_retries: u32,
    /// Previews older than this are not rendered optimistically.
    pub preview_max_age_ms: u64,
    pub event_journal_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_hot: 4,
            debounce_ms: 600,
            stall_timeout_ms: 8_000,
            max_transport_retries: 4,
            backoff_base_ms: 200,
            backoff_max_ms: 5_000,
            conflict_retries: 1,
            preview_max_age_ms: 30_000,
            event_journal_capacity: 1024,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RuntimeFile {
    #[serde(default)]
    runtime: RuntimeConfig,
}

impl RuntimeConfig {
    /// Load a TOML file with a `[runtime]` table.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read runtime config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("bad runtime config {}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RuntimeFile =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        file.runtime.validated()
    }

    pub fn validated(self) -> Result<Self> {
        if self.max_hot == 0 {
            return Err(Error::Config("max_hot must be at least 1".into()));
        }
        if self.stall_timeout_ms == 0 {
            return Err(Error::Config("stall_timeout_ms must be non-zero".into()));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(Error::Config(format!(
                "backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        Ok(self)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn preview_max_age(&self) -> Duration {
        Duration::from_millis(self.preview_max_age_ms)
    }

    /// Delay before transport retry `attempt` (1-based): base doubled per
    /// attempt, capped at `backoff_max_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self.backoff_base_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(ms.min(self.backoff_max_ms))
    }
}
