//! Configuration file types (keel.yaml)

use serde::{Deserialize, Serialize};

/// Main configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeelConfigFile {
    #[serde(default)]
    pub requeue: RequeueConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub uninstall: UninstallConfig,

    #[serde(default)]
    pub controller: ControllerConfig,
}

/// Delay window used when a pass asks to be retried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequeueConfig {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_min_delay_ms() -> u64 {
    3000
}

fn default_max_delay_ms() -> u64 {
    5000
}

/// Log throttling intervals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum seconds between two identical error messages
    #[serde(default = "default_error_throttle_secs")]
    pub error_throttle_secs: u64,

    /// Minimum seconds between two identical progress messages
    #[serde(default = "default_progress_throttle_secs")]
    pub progress_throttle_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            error_throttle_secs: default_error_throttle_secs(),
            progress_throttle_secs: default_progress_throttle_secs(),
        }
    }
}

fn default_error_throttle_secs() -> u64 {
    30
}

fn default_progress_throttle_secs() -> u64 {
    10
}

/// Uninstall behaviour
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UninstallConfig {
    /// Namespaces shared by several components, deleted during cleanup
    #[serde(default)]
    pub shared_namespaces: Vec<String>,

    /// Uninstall components that were disabled in the spec while installed
    #[serde(default)]
    pub uninstall_disabled_components: bool,
}

/// Controller loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Stop after this many passes (0 = unbounded)
    #[serde(default)]
    pub max_passes: u64,

    /// Poll interval after a pass that finished with nothing left to do
    #[serde(default = "default_idle_interval_secs")]
    pub idle_interval_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_passes: 0,
            idle_interval_secs: default_idle_interval_secs(),
        }
    }
}

fn default_idle_interval_secs() -> u64 {
    60
}
