//! Hot-reload configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::watcher::WatchConfig;

/// What a failed reload does with the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Drop the module entirely; the host may load it again later
    #[default]
    Unload,
    /// Re-map the previous staged copy and replay the captured state into it
    Rollback,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unload" => Ok(Self::Unload),
            "rollback" => Ok(Self::Rollback),
            other => Err(format!("Unknown failure policy: {}", other)),
        }
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Unload => write!(f, "unload"),
            FailurePolicy::Rollback => write!(f, "rollback"),
        }
    }
}

/// Hot-reload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    /// Directory holding the module binaries produced by the build
    pub source_dir: PathBuf,
    /// Private directory for staged copies; a temporary one when unset
    pub staging_dir: Option<PathBuf>,
    /// Modules to load at startup, by logical name
    pub modules: Vec<String>,
    /// Interval between reload drains
    pub drain_interval_ms: u64,
    /// Behaviour when a new binary fails to map
    pub failure_policy: FailurePolicy,
    /// Skip reloads whose source bytes did not change
    pub skip_unchanged: bool,
    /// Source directory watch settings
    pub watch: WatchConfig,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            staging_dir: None,
            modules: Vec::new(),
            drain_interval_ms: 250,
            failure_policy: FailurePolicy::default(),
            skip_unchanged: false,
            watch: WatchConfig::default(),
        }
    }
}

impl HotReloadConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source directory
    pub fn with_source_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.source_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set a fixed staging directory
    pub fn with_staging_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.staging_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Add a module to load at startup
    pub fn with_module(mut self, name: &str) -> Self {
        if !self.modules.iter().any(|m| m == name) {
            self.modules.push(name.to_string());
        }
        self
    }

    /// Set the drain interval
    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the failure policy
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Enable/disable skipping of unchanged binaries
    pub fn with_skip_unchanged(mut self, enabled: bool) -> Self {
        self.skip_unchanged = enabled;
        self
    }

    /// Set watch configuration
    pub fn with_watch_config(mut self, watch: WatchConfig) -> Self {
        self.watch = watch;
        self
    }

    /// Drain interval as a duration, never zero
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms.max(1))
    }
}
