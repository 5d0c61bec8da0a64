//! Resolved backend configuration of a running session

use crate::config::{Mode, ParmapConfig, QueueResources};
use crate::error::{ErrorCode, ParmapError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Settings the dispatcher reads while a backend is running.
///
/// Produced from a [`ParmapConfig`] by [`BackendConfig::resolve`] when the
/// session starts and left untouched until it stops.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub mode: Mode,
    pub cpus: usize,
    pub socket_hosts: Vec<String>,
    pub level: Option<String>,
    pub logging: bool,
    pub storage_dir: PathBuf,
    pub load_balancing: bool,
    pub show_info: bool,
    pub poll_interval: Duration,
    pub queue_resources: QueueResources,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::local(&ParmapConfig::default())
    }
}

fn detected_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl BackendConfig {
    fn local(config: &ParmapConfig) -> Self {
        Self {
            mode: Mode::Local,
            cpus: 1,
            socket_hosts: Vec::new(),
            level: config.level.clone(),
            logging: false,
            storage_dir: config.storage_dir.clone(),
            load_balancing: false,
            show_info: config.show_info,
            poll_interval: config.poll_interval,
            queue_resources: QueueResources::new(),
        }
    }

    /// Validate `config` and fill in mode-dependent defaults
    pub fn resolve(config: &ParmapConfig) -> Result<Self> {
        if config.cpus == Some(0) {
            return Err(ParmapError::config_with_code(
                ErrorCode::CONFIG_INVALID_CPUS,
                "cpus must be at least 1",
            ));
        }

        if config.logging && !config.storage_dir.is_dir() {
            return Err(ParmapError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!(
                    "Storage directory {} does not exist",
                    config.storage_dir.display()
                ),
            ));
        }

        if config.mode.is_local() {
            return Ok(Self::local(config));
        }

        let mut socket_hosts = Vec::new();
        let cpus = match config.mode {
            Mode::Socket if !config.socket_hosts.is_empty() => {
                let hosts = config.socket_hosts.len();
                if let Some(cpus) = config.cpus {
                    if cpus != hosts {
                        return Err(ParmapError::config_with_code(
                            ErrorCode::CONFIG_INVALID_CPUS,
                            format!(
                                "cpus = {} does not match the {} socket hosts given",
                                cpus, hosts
                            ),
                        ));
                    }
                }
                socket_hosts = config.socket_hosts.clone();
                hosts
            }
            _ => config.cpus.unwrap_or_else(detected_cpus),
        };

        if config.mode == Mode::Socket && socket_hosts.is_empty() {
            socket_hosts = vec!["localhost".to_string(); cpus];
        }

        Ok(Self {
            mode: config.mode,
            cpus,
            socket_hosts,
            level: config.level.clone(),
            logging: config.logging,
            storage_dir: config.storage_dir.clone(),
            load_balancing: config.load_balancing,
            show_info: config.show_info,
            poll_interval: config.poll_interval,
            queue_resources: config.queue_resources.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_is_single_cpu() {
        let resolved = BackendConfig::resolve(&ParmapConfig::local().with_cpus(8)).unwrap();
        assert_eq!(resolved.mode, Mode::Local);
        assert_eq!(resolved.cpus, 1);
    }

    #[test]
    fn test_multicore_defaults_to_detected_cpus() {
        let resolved = BackendConfig::resolve(&ParmapConfig::new(Mode::Multicore)).unwrap();
        assert_eq!(resolved.cpus, detected_cpus());
    }

    #[test]
    fn test_socket_cpus_follow_hosts() {
        let resolved =
            BackendConfig::resolve(&ParmapConfig::socket(["node1", "node2", "node3"])).unwrap();
        assert_eq!(resolved.cpus, 3);
        assert_eq!(resolved.socket_hosts.len(), 3);

        let by_count = BackendConfig::resolve(&ParmapConfig::new(Mode::Socket).with_cpus(2)).unwrap();
        assert_eq!(by_count.socket_hosts, vec!["localhost", "localhost"]);
    }

    #[test]
    fn test_socket_cpus_host_mismatch() {
        let err = BackendConfig::resolve(&ParmapConfig::socket(["a", "b"]).with_cpus(3)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_CPUS);
    }

    #[test]
    fn test_zero_cpus_rejected() {
        let err = BackendConfig::resolve(&ParmapConfig::multicore(0)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_logging_requires_storage_dir() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = BackendConfig::resolve(
            &ParmapConfig::multicore(2)
                .with_logging(true)
                .with_storage_dir(&missing),
        )
        .unwrap_err();
        assert!(err.is_configuration());

        let ok = BackendConfig::resolve(
            &ParmapConfig::multicore(2)
                .with_logging(true)
                .with_storage_dir(dir.path()),
        )
        .unwrap();
        assert!(ok.logging);
    }
}
