//! Configuration defaults for parallel mapping sessions
//!
//! A [`ParmapConfig`] describes how a session should be started: which
//! backend to use, how many cpus, whether units log to disk and so on.
//! Defaults come from an optional TOML file and `PARMAP_*` environment
//! variables, see [`loader`].

use crate::error::{ErrorCode, ParmapError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub mod loader;

#[cfg(test)]
mod tests;

pub use loader::{default_config_path, load, load_from};

/// Opaque resource descriptor handed to queue backends on submission
pub type QueueResources = BTreeMap<String, Value>;

/// Parallelization mode of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Sequential execution in the calling context
    #[default]
    Local,
    /// Pool of forked workers on the local machine
    Multicore,
    /// Long-lived socket cluster workers
    Socket,
    /// Long-lived MPI cluster workers
    Mpi,
    /// First generation batch queue
    LegacyQueue,
    /// Current generation batch queue
    Queue,
}

impl Mode {
    pub const ALL: [Mode; 6] = [
        Mode::Local,
        Mode::Multicore,
        Mode::Socket,
        Mode::Mpi,
        Mode::LegacyQueue,
        Mode::Queue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Local => "local",
            Mode::Multicore => "multicore",
            Mode::Socket => "socket",
            Mode::Mpi => "mpi",
            Mode::LegacyQueue => "legacy-queue",
            Mode::Queue => "queue",
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Mode::Local)
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self, Mode::Socket | Mode::Mpi)
    }

    pub fn is_queue(&self) -> bool {
        matches!(self, Mode::LegacyQueue | Mode::Queue)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ParmapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Mode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| {
                let choices: Vec<&str> = Mode::ALL.iter().map(Mode::as_str).collect();
                ParmapError::config_with_code(
                    ErrorCode::CONFIG_UNKNOWN_MODE,
                    format!("Unknown mode '{}', expected one of: {}", s, choices.join(", ")),
                )
            })
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

/// Settings used to start a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParmapConfig {
    /// Backend family to start
    pub mode: Mode,
    /// Number of workers; resolved per mode when absent
    pub cpus: Option<usize>,
    /// Node names for socket clusters
    pub socket_hosts: Vec<String>,
    /// Active parallelization level
    pub level: Option<String>,
    /// Levels registered up front
    pub registered_levels: Vec<String>,
    /// Capture per-unit logs under the storage directory
    pub logging: bool,
    /// Root directory for logs and queue registries
    pub storage_dir: PathBuf,
    /// Hand units to idle workers dynamically
    pub load_balancing: bool,
    /// Emit the informational message before parallel dispatch
    pub show_info: bool,
    /// How often queue backends poll job states
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Resource descriptor passed through to queue submissions
    pub queue_resources: QueueResources,
}

impl Default for ParmapConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Local,
            cpus: None,
            socket_hosts: Vec::new(),
            level: None,
            registered_levels: Vec::new(),
            logging: false,
            storage_dir: default_storage_dir(),
            load_balancing: false,
            show_info: true,
            poll_interval: default_poll_interval(),
            queue_resources: QueueResources::new(),
        }
    }
}

impl ParmapConfig {
    /// Create settings for the given mode with default values
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn local() -> Self {
        Self::new(Mode::Local)
    }

    pub fn multicore(cpus: usize) -> Self {
        Self::new(Mode::Multicore).with_cpus(cpus)
    }

    pub fn socket<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Mode::Socket).with_socket_hosts(hosts)
    }

    pub fn mpi(cpus: usize) -> Self {
        Self::new(Mode::Mpi).with_cpus(cpus)
    }

    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = Some(cpus);
        self
    }

    pub fn with_socket_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.socket_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn with_load_balancing(mut self, enabled: bool) -> Self {
        self.load_balancing = enabled;
        self
    }

    pub fn with_show_info(mut self, enabled: bool) -> Self {
        self.show_info = enabled;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_resource(mut self, key: impl Into<String>, value: Value) -> Self {
        self.queue_resources.insert(key.into(), value);
        self
    }
}
