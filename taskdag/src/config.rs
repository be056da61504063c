// src/config.rs

use std::time::Duration;

use serde::Deserialize;

use crate::errors::{Error, Result};

/// Process-wide scheduler settings, read once at startup.
///
/// The struct derives `Deserialize` so embedding hosts can carry it inside
/// their own configuration files:
///
/// ```toml
/// [scheduler]
/// max_pool_size = 8
/// max_retries = 3
/// debug_graph = true
/// ```
///
/// All fields are optional and have reasonable defaults. Hosts that prefer
/// environment variables can use [`SchedulerConfig::from_env`] instead.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// The maximum number of workers to use while executing activities in
    /// parallel.
    ///
    /// Activities are coarse-grained, so the cap is deliberately small.
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,

    /// Workers kept alive even when idle.
    #[serde(default = "default_core_pool_size")]
    pub core_pool_size: usize,

    /// How long an idle worker above `core_pool_size` waits for new work
    /// before retiring.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// The maximum number of retries allowed for an activity to recover from
    /// failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Emit a GraphViz description of the dependency graph before each
    /// execution pass, at debug level.
    #[serde(default)]
    pub debug_graph: bool,
}

fn default_max_pool_size() -> usize {
    20
}

fn default_core_pool_size() -> usize {
    1
}

fn default_keep_alive_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_pool_size: default_max_pool_size(),
            core_pool_size: default_core_pool_size(),
            keep_alive_secs: default_keep_alive_secs(),
            max_retries: default_max_retries(),
            debug_graph: false,
        }
    }
}

impl SchedulerConfig {
    /// Build a configuration from `TASKDAG_*` environment variables, falling
    /// back to the defaults for anything unset or unparseable:
    ///
    /// - `TASKDAG_MAX_POOL_SIZE`
    /// - `TASKDAG_CORE_POOL_SIZE`
    /// - `TASKDAG_KEEP_ALIVE_SECS`
    /// - `TASKDAG_MAX_RETRY`
    /// - `TASKDAG_DEBUG_OPERATIONS` ("true"/"1")
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_pool_size: env_parse("TASKDAG_MAX_POOL_SIZE", defaults.max_pool_size),
            core_pool_size: env_parse("TASKDAG_CORE_POOL_SIZE", defaults.core_pool_size),
            keep_alive_secs: env_parse("TASKDAG_KEEP_ALIVE_SECS", defaults.keep_alive_secs),
            max_retries: env_parse("TASKDAG_MAX_RETRY", defaults.max_retries),
            debug_graph: env_bool("TASKDAG_DEBUG_OPERATIONS", defaults.debug_graph),
        }
    }

    /// Run basic semantic validation against the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_pool_size == 0 {
            return Err(Error::Config("max_pool_size must be >= 1 (got 0)".into()));
        }

        if self.core_pool_size > self.max_pool_size {
            return Err(Error::Config(format!(
                "core_pool_size ({}) must not exceed max_pool_size ({})",
                self.core_pool_size, self.max_pool_size
            )));
        }

        Ok(())
    }

    /// The keep-alive timeout as a [`Duration`].
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}
