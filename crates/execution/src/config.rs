//! Orchestrator configuration and its JSON file form.

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::scheduler::Budget;

/// Errors loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid JSON for this shape
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything the orchestrator needs to know about limits and timing.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Admission budget
    pub budget: Budget,
    /// Per-task engine settings
    pub engine: EngineConfig,
    /// How long `stop` waits for the driver loop
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            budget: Budget::default(),
            engine: EngineConfig::default(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl OrchestratorConfig {
    /// Set the admission budget.
    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// Set the engine settings.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// On-disk configuration, all fields optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorFileConfig {
    /// Max tasks executing at once
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Driver loop poll interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-step timeout; absent means unbounded
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,

    /// Paused task poll interval
    #[serde(default = "default_pause_poll_interval_ms")]
    pub pause_poll_interval_ms: u64,

    /// Shutdown wait
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_max_concurrent_tasks() -> usize {
    5
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_pause_poll_interval_ms() -> u64 {
    100
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

impl Default for OrchestratorFileConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            poll_interval_ms: default_poll_interval_ms(),
            step_timeout_secs: None,
            pause_poll_interval_ms: default_pause_poll_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl OrchestratorFileConfig {
    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Convert to the runtime configuration.
    pub fn into_config(self) -> Result<OrchestratorConfig, ConfigError> {
        let max = NonZeroUsize::new(self.max_concurrent_tasks)
            .ok_or_else(|| ConfigError::Invalid("max_concurrent_tasks must be at least 1".to_string()))?;
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".to_string()));
        }

        let budget = Budget::new()
            .with_max_concurrent(max)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms));

        let mut engine = EngineConfig::default()
            .with_pause_poll_interval(Duration::from_millis(self.pause_poll_interval_ms.max(1)));
        if let Some(secs) = self.step_timeout_secs {
            engine = engine.with_step_timeout(Duration::from_secs(secs));
        }

        Ok(OrchestratorConfig::default()
            .with_budget(budget)
            .with_engine(engine)
            .with_shutdown_timeout(Duration::from_millis(self.shutdown_timeout_ms)))
    }
}
