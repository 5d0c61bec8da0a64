//! Job lifecycle controller for queue backends
//!
//! One mapping call on a queue goes through:
//!
//! 1. reset the registry (generation dependent)
//! 2. submit one job per unit, retrying failed submissions
//! 3. poll until every job is terminal, or until the first failure when
//!    failures are fatal
//! 4. on a fatal failure kill every job still on the system and abort;
//!    otherwise collect results, turning failed jobs into error values
//! 5. copy job logs into the call's log directory, warning on failure

use super::{JobId, JobQueue, JobState, JobStatus, QueueGeneration};
use crate::backend::Workload;
use crate::config::QueueResources;
use crate::dispatch::{unit_log_name, ErrorRecord, JobResult};
use crate::error::{ErrorCode, ErrorExt, ParmapError, Result, UnitFailure};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Note attached to aborts of queue mapping calls
pub const ABORT_NOTE: &str = "Please note that remaining jobs were killed when the 1st error occurred to save cluster time.\nIf you want to further debug errors, your job registry is here:";

/// Drives the jobs of one mapping call through their lifecycle
pub struct LifecycleController<'a> {
    queue: &'a dyn JobQueue,
    generation: QueueGeneration,
    poll_interval: Duration,
    resources: &'a QueueResources,
}

impl<'a> LifecycleController<'a> {
    pub fn new(
        queue: &'a dyn JobQueue,
        generation: QueueGeneration,
        poll_interval: Duration,
        resources: &'a QueueResources,
    ) -> Self {
        Self {
            queue,
            generation,
            poll_interval,
            resources,
        }
    }

    pub async fn run(&self, workload: Workload) -> Result<Vec<JobResult>> {
        self.reset_registry().await?;
        if workload.is_empty() {
            return Ok(Vec::new());
        }

        let ids = self.submit(&workload).await?;
        let stop_on_error = !workload.imputing;
        let statuses = self.wait(&ids, stop_on_error).await?;

        if stop_on_error {
            let failures = failures(&statuses);
            if !failures.is_empty() {
                let abort = self.abort(&ids, failures).await;
                self.copy_logs(&statuses, workload.log_dir.as_deref()).await;
                return Err(abort);
            }
        }

        self.copy_logs(&statuses, workload.log_dir.as_deref()).await;
        self.collect(statuses).await
    }

    /// Copy job logs into the call's log directory. Failures only warn.
    async fn copy_logs(&self, statuses: &[JobStatus], dir: Option<&Path>) {
        let Some(dir) = dir else {
            return;
        };
        if let Err(e) = self.retrieve_logs(statuses, dir).await {
            warn!("Could not retrieve job logs into {}: {}", dir.display(), e);
        }
    }

    async fn reset_registry(&self) -> Result<()> {
        match self.generation {
            QueueGeneration::Legacy => {
                debug!("Removing all jobs from {}", self.queue.file_dir().display());
                self.queue.clear().await
            }
            QueueGeneration::Current => {
                if self.queue.job_ids().await?.is_empty() {
                    Ok(())
                } else {
                    debug!("Clearing registry {}", self.queue.file_dir().display());
                    self.queue.clear().await
                }
            }
        }
    }

    async fn submit(&self, workload: &Workload) -> Result<Vec<JobId>> {
        let retries = self.generation.submit_retries();
        let mut attempt = 0;
        loop {
            match self
                .queue
                .submit(&workload.units, &workload.wrapper, self.resources)
                .await
            {
                Ok(ids) => {
                    debug!("Submitted {} jobs", ids.len());
                    return Ok(ids);
                }
                Err(e) if attempt < retries => {
                    attempt += 1;
                    warn!(
                        "Submitting jobs failed (attempt {} of {}): {}",
                        attempt,
                        retries + 1,
                        e
                    );
                    // drop partially registered jobs before the next attempt
                    self.queue.clear().await?;
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    return Err(ParmapError::backend_with_code(
                        ErrorCode::BACKEND_SUBMIT_FAILED,
                        format!("Submitting jobs failed after {} attempts", attempt + 1),
                        "queue",
                    )
                    .with_source(e))
                }
            }
        }
    }

    async fn wait(&self, ids: &[JobId], stop_on_error: bool) -> Result<Vec<JobStatus>> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            let statuses = self.queue.status(ids).await?;

            if stop_on_error && statuses.iter().any(|s| s.state.is_failure()) {
                debug!("Stopped waiting at the first failed job");
                return Ok(statuses);
            }
            if statuses.iter().all(|s| s.state.is_terminal()) {
                return Ok(statuses);
            }
        }
    }

    async fn retrieve_logs(&self, statuses: &[JobStatus], dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .to_storage_error(format!("Failed to create log directory {}", dir.display()))?;

        for status in statuses.iter().filter(|s| self.generation.keeps_log(s)) {
            match self.queue.log(status.id).await? {
                Some(content) => {
                    let target = dir.join(unit_log_name(status.index));
                    tokio::fs::write(&target, content)
                        .await
                        .to_storage_error(format!("Failed to write {}", target.display()))?;
                }
                None => debug!("No log captured for job {}", status.id),
            }
        }
        Ok(())
    }

    async fn abort(&self, ids: &[JobId], failures: Vec<UnitFailure>) -> ParmapError {
        let note = format!("{}\n{}", ABORT_NOTE, self.queue.file_dir().display());

        if let Err(e) = self.kill_remaining(ids).await {
            warn!("Killing remaining jobs failed: {}", e);
        }
        ParmapError::abort_with_note(failures, note)
    }

    async fn kill_remaining(&self, ids: &[JobId]) -> Result<()> {
        let on_system = on_system(&self.queue.status(ids).await?);
        if on_system.is_empty() {
            return Ok(());
        }

        let killed = self.queue.kill(&on_system).await?;
        info!("Killed {} remaining jobs", killed.len());

        let still = on_system_count(&self.queue.status(ids).await?);
        if still > 0 {
            warn!(
                "Still {} jobs from operation on system! kill them manually!",
                still
            );
        }
        Ok(())
    }

    async fn collect(&self, statuses: Vec<JobStatus>) -> Result<Vec<JobResult>> {
        let mut results = Vec::with_capacity(statuses.len());
        for status in statuses {
            let result = match status.state {
                JobState::Done => match self.queue.result(status.id).await? {
                    Some(value) => JobResult::Value(value),
                    None => {
                        return Err(ParmapError::backend_with_code(
                            ErrorCode::BACKEND_RESULT_MISSING,
                            format!(
                                "Job {} finished but its result for unit {} is missing",
                                status.id,
                                status.index + 1
                            ),
                            "queue",
                        ))
                    }
                },
                JobState::Error => {
                    JobResult::Error(status.error.unwrap_or_else(ErrorRecord::expired))
                }
                _ => JobResult::Error(ErrorRecord::expired()),
            };
            results.push(result);
        }
        Ok(results)
    }
}

fn failures(statuses: &[JobStatus]) -> Vec<UnitFailure> {
    let mut failures: Vec<UnitFailure> = statuses
        .iter()
        .filter(|s| s.state.is_failure())
        .map(|s| {
            let message = match (&s.state, &s.error) {
                (JobState::Error, Some(record)) => record.to_string(),
                _ => ErrorRecord::expired().message,
            };
            UnitFailure::new(s.index, message)
        })
        .collect();
    failures.sort_by_key(|f| f.index);
    failures
}

fn on_system(statuses: &[JobStatus]) -> Vec<JobId> {
    statuses
        .iter()
        .filter(|s| s.state.is_on_system())
        .map(|s| s.id)
        .collect()
}

fn on_system_count(statuses: &[JobStatus]) -> usize {
    statuses.iter().filter(|s| s.state.is_on_system()).count()
}
