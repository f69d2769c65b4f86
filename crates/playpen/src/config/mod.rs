use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::types::{MAX_INPUT_SIZE, TIMEOUT_MS};

mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../playpen.example.toml");

/// Default file name of the runtime support manifest under the base path
pub const DEFAULT_MANIFEST_NAME: &str = "runtime.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for the playpen supervisor
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Maximum program length in characters.
    ///
    /// Longer programs are rejected locally and never reach the isolate.
    #[serde(default = "default_max_input_size")]
    pub max_input_size: usize,

    /// Wall clock budget for one execution in milliseconds.
    ///
    /// When it expires the isolate is destroyed and recreated.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Directory holding the runtime manifest and module, sent with `init`
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// Path to the worker binary (discovered if not specified)
    #[serde(default)]
    pub worker_path: Option<PathBuf>,

    /// File name of the runtime manifest inside `base_path`
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,
}

impl Config {
    /// Create a new config from the embedded example
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the execution timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Override the execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Override the runtime base path
    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Override the worker binary path
    pub fn with_worker_path(mut self, worker_path: impl Into<PathBuf>) -> Self {
        self.worker_path = Some(worker_path.into());
        self
    }

    /// Base path as sent in the `init` message
    pub fn base_path_string(&self) -> String {
        self.base_path.to_string_lossy().into_owned()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_max_input_size() -> usize {
    MAX_INPUT_SIZE
}

fn default_timeout_ms() -> u64 {
    TIMEOUT_MS
}

fn default_base_path() -> PathBuf {
    PathBuf::from("runtime")
}

fn default_manifest_name() -> String {
    DEFAULT_MANIFEST_NAME.to_owned()
}
