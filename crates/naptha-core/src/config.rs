//! Configuration and local state directory management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};
use crate::types::NodeAddress;

/// Paths to the client's persisted local state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root state directory (e.g., `.naptha/`).
    pub root: PathBuf,
    /// Signing key, hex encoded (`.naptha/identity.key`).
    pub identity_key: PathBuf,
    /// Recent run ids (`.naptha/runs.json`).
    pub run_cache: PathBuf,
    /// Default output directory for storage reads (`.naptha/files/`).
    pub files: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            identity_key: root.join("identity.key"),
            run_cache: root.join("runs.json"),
            files: root.join("files"),
            root,
        };
        paths.ensure_dirs()?;
        Ok(paths)
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(&self.files)?;
        Ok(())
    }
}

/// Retry, polling and deadline settings for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Backoff for transport failures while submitting a run.
    #[serde(default = "BackoffPolicy::submit_default")]
    pub submit: BackoffPolicy,
    /// Interval schedule between polls of a non-terminal run.
    #[serde(default = "BackoffPolicy::poll_default")]
    pub poll: BackoffPolicy,
    /// Retries of failed plan steps; `max_attempts` bounds attempts per step.
    #[serde(default = "BackoffPolicy::step_default")]
    pub step: BackoffPolicy,
    /// Retries of idempotent environment operations.
    #[serde(default = "default_environment_backoff")]
    pub environment: BackoffPolicy,
    /// How many times a timed-out step is retried before it counts as failed.
    #[serde(default = "default_timeout_retries")]
    pub timeout_retries: u32,
    /// Deadline for a single run, in seconds.
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,
    /// Deadline for a single environment operation, in seconds.
    #[serde(default = "default_environment_deadline_secs")]
    pub environment_deadline_secs: u64,
    /// Upper bound on concurrently dispatched plan steps.
    #[serde(default = "default_max_parallel_steps")]
    pub max_parallel_steps: usize,
    /// Backoff for transport failures on storage reads and writes.
    #[serde(default = "BackoffPolicy::submit_default")]
    pub storage: BackoffPolicy,
}

fn default_environment_backoff() -> BackoffPolicy {
    BackoffPolicy::exponential(
        Duration::from_millis(200),
        2.0,
        Duration::from_secs(2),
        3,
    )
}
fn default_timeout_retries() -> u32 {
    1
}
fn default_run_deadline_secs() -> u64 {
    300
}
fn default_environment_deadline_secs() -> u64 {
    30
}
fn default_max_parallel_steps() -> usize {
    8
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            submit: BackoffPolicy::submit_default(),
            poll: BackoffPolicy::poll_default(),
            step: BackoffPolicy::step_default(),
            environment: default_environment_backoff(),
            timeout_retries: default_timeout_retries(),
            run_deadline_secs: default_run_deadline_secs(),
            environment_deadline_secs: default_environment_deadline_secs(),
            max_parallel_steps: default_max_parallel_steps(),
            storage: BackoffPolicy::submit_default(),
        }
    }
}

impl RetrySettings {
    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }

    pub fn environment_deadline(&self) -> Duration {
        Duration::from_secs(self.environment_deadline_secs)
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Default worker node.
    pub node_url: NodeAddress,
    /// Hub registry base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_username: Option<String>,
    #[serde(skip)]
    pub hub_password: Option<String>,
    /// Hex signing key supplied through the environment instead of the key file.
    #[serde(skip)]
    pub private_key: Option<String>,
    /// Local state directories.
    pub data_paths: DataPaths,
    /// Retry and deadline settings.
    pub retry: RetrySettings,
    /// Per-request HTTP timeout, in seconds.
    pub request_timeout_secs: u64,
}

pub const DEFAULT_NODE_URL: &str = "http://localhost:7001";

impl ClientConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> Result<Self> {
        let node_url = std::env::var("NODE_URL").unwrap_or_else(|_| DEFAULT_NODE_URL.into());
        let node_url = NodeAddress::new(&node_url)
            .map_err(|e| Error::Config(format!("NODE_URL: {}", e)))?;

        let data_paths = DataPaths::new(data_dir)?;

        let mut retry = RetrySettings::default();
        if let Some(secs) = env_u64("NAPTHA_RUN_DEADLINE_SECS") {
            retry.run_deadline_secs = secs;
        }
        if let Some(n) = env_u64("NAPTHA_STEP_ATTEMPTS") {
            retry.step.max_attempts = n.max(1) as u32;
        }

        Ok(Self {
            node_url,
            hub_url: std::env::var("HUB_URL").ok(),
            hub_username: std::env::var("HUB_USER").ok(),
            hub_password: std::env::var("HUB_PASS").ok(),
            private_key: std::env::var("PRIVATE_KEY").ok().filter(|k| !k.is_empty()),
            data_paths,
            retry,
            request_timeout_secs: env_u64("NAPTHA_REQUEST_TIMEOUT_SECS").unwrap_or(30),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a number", name, raw);
            None
        }
    }
}
