//! Sequential execution on a single blocking thread

use super::{ExecutionBackend, Workload};
use crate::config::Mode;
use crate::dispatch::{JobResult, WorkUnit, WorkWrapper};
use crate::error::Result;
use async_trait::async_trait;

/// Run every unit in order on the current thread
pub fn run_sequential(units: &[WorkUnit], wrapper: &WorkWrapper) -> Vec<JobResult> {
    units.iter().map(|unit| wrapper.call(unit)).collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalBackend;

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn mode(&self) -> Mode {
        Mode::Local
    }

    fn cpus(&self) -> usize {
        1
    }

    async fn run_all(&self, workload: Workload) -> Result<Vec<JobResult>> {
        let Workload { units, wrapper, .. } = workload;
        let results =
            tokio::task::spawn_blocking(move || run_sequential(&units, &wrapper)).await?;
        Ok(results)
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
