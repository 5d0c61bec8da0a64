//! Execution backends
//!
//! Every backend takes the ordered work units of one mapping call and a
//! [`WorkWrapper`], and hands back one [`JobResult`] per unit in unit order,
//! whatever its internal scheduling. Backends are started once per session
//! and shut down when the session stops.

use crate::config::Mode;
use crate::dispatch::{JobResult, WorkUnit, WorkWrapper};
use crate::error::{ErrorCode, ParmapError, Result};
use crate::session::{BackendConfig, SessionId};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

pub mod cluster;
pub mod local;
pub mod multicore;
pub mod queue;

pub use cluster::{ClusterBackend, ClusterKind};
pub use local::LocalBackend;
pub use multicore::MulticoreBackend;
pub use queue::QueueBackend;

/// Everything a backend needs to run one mapping call
#[derive(Debug, Clone)]
pub struct Workload {
    pub units: Vec<WorkUnit>,
    pub wrapper: WorkWrapper,
    /// Failures are imputed rather than aborting the call
    pub imputing: bool,
    /// Directory receiving one `NNNNN.log` per unit
    pub log_dir: Option<PathBuf>,
}

impl Workload {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Common contract of all execution backends
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn mode(&self) -> Mode;

    /// Number of workers or concurrent job slots
    fn cpus(&self) -> usize;

    /// Run every unit and return the results in unit order
    async fn run_all(&self, workload: Workload) -> Result<Vec<JobResult>>;

    /// Release workers and external resources
    async fn shutdown(&self) -> Result<()>;
}

/// Start the backend described by `config`
pub async fn start(config: &BackendConfig, session: &SessionId) -> Result<Arc<dyn ExecutionBackend>> {
    let backend: Arc<dyn ExecutionBackend> = match config.mode {
        Mode::Local => Arc::new(LocalBackend),
        Mode::Multicore => Arc::new(MulticoreBackend::new(config.cpus, config.load_balancing)),
        Mode::Socket => Arc::new(ClusterBackend::start(
            ClusterKind::Socket,
            &config.socket_hosts,
            config.load_balancing,
        )?),
        Mode::Mpi => {
            let ranks: Vec<String> = (0..config.cpus).map(|rank| format!("rank{}", rank)).collect();
            Arc::new(ClusterBackend::start(
                ClusterKind::Mpi,
                &ranks,
                config.load_balancing,
            )?)
        }
        Mode::LegacyQueue | Mode::Queue => Arc::new(QueueBackend::start(config, session).await?),
    };
    Ok(backend)
}

/// Place `(index, result)` pairs into unit order, failing on gaps
pub(crate) fn into_ordered(
    n: usize,
    pairs: impl IntoIterator<Item = (usize, JobResult)>,
    backend: &str,
) -> Result<Vec<JobResult>> {
    let mut slots: Vec<Option<JobResult>> = vec![None; n];
    for (index, result) in pairs {
        if let Some(slot) = slots.get_mut(index) {
            *slot = Some(result);
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| {
                ParmapError::backend_with_code(
                    ErrorCode::BACKEND_RESULT_MISSING,
                    format!("No result returned for unit {}", index + 1),
                    backend,
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_ordered_reorders() {
        let pairs = vec![
            (2, JobResult::Value(json!("c"))),
            (0, JobResult::Value(json!("a"))),
            (1, JobResult::Value(json!("b"))),
        ];
        let ordered = into_ordered(3, pairs, "test").unwrap();
        let values: Vec<_> = ordered.iter().filter_map(JobResult::value).cloned().collect();
        assert_eq!(values, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[test]
    fn test_into_ordered_reports_gap() {
        let err = into_ordered(2, vec![(0, JobResult::Value(json!(1)))], "test").unwrap_err();
        assert_eq!(err.code(), ErrorCode::BACKEND_RESULT_MISSING);
        assert!(err.to_string().contains("unit 2"));
    }
}
