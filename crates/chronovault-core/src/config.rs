//! Chronovault configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CoreError, Result};

/// Root configuration of a scheduler instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// When false the instance accepts and queries tasks but never runs them.
    #[serde(default = "bool_true")]
    pub enable_task_execution: bool,
    /// Period of the store scan for tasks created by other processes. 0 disables it.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub initial_poll_delay_secs: u64,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Consecutive failed attempts of one scheduled execution before it becomes terminal.
    #[serde(default = "default_failure_limit")]
    pub failure_limit: u32,
    #[serde(default)]
    pub retry_interval_ms: u64,
    #[serde(default = "default_transaction_timeout")]
    pub default_transaction_timeout_secs: u64,
    #[serde(default = "default_claim_margin")]
    pub claim_margin_secs: u64,
    #[serde(default)]
    pub context: ContextConfig,
}

fn bool_true() -> bool { true }
fn default_db_path() -> String { "~/.chronovault/tasks.db".into() }
fn default_poll_interval() -> u64 { 30 }
fn default_max_workers() -> usize { 4 }
fn default_failure_limit() -> u32 { 2 }
fn default_transaction_timeout() -> u64 { 120 }
fn default_claim_margin() -> u64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            enable_task_execution: true,
            poll_interval_secs: default_poll_interval(),
            initial_poll_delay_secs: 0,
            max_workers: default_max_workers(),
            failure_limit: default_failure_limit(),
            retry_interval_ms: 0,
            default_transaction_timeout_secs: default_transaction_timeout(),
            claim_margin_secs: default_claim_margin(),
            context: ContextConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load config from the default path (~/.chronovault/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        tracing::debug!("Loaded scheduler config from {}", path.display());
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CoreError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.failure_limit == 0 {
            return Err(CoreError::Config("failure_limit must be at least 1".into()));
        }
        if self.max_workers == 0 {
            return Err(CoreError::Config("max_workers must be at least 1".into()));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Chronovault home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".chronovault")
    }

    /// The database path with `~` expanded.
    pub fn resolved_db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).to_string())
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }

    pub fn default_transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.default_transaction_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Kinds of submitter context that can follow a task onto its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// Owning application; workloads resolve application-scoped types through it.
    Application,
    /// Namespace used for directory lookups.
    Naming,
}

/// Context propagation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_propagate")]
    pub propagate: Vec<ContextKind>,
}

fn default_propagate() -> Vec<ContextKind> {
    vec![ContextKind::Application, ContextKind::Naming]
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { propagate: default_propagate() }
    }
}

impl ContextConfig {
    pub fn propagates(&self, kind: ContextKind) -> bool {
        self.propagate.contains(&kind)
    }
}
