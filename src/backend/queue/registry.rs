//! On-disk job registry with local job slots
//!
//! Layout of the registry directory:
//!
//! ```text
//! <root>/jobs/00001.json   one record per job, named by job id
//! <root>/logs/00001.log    captured output, named by unit number
//! ```
//!
//! Jobs wait for one of `slots` permits, then run the wrapped unit on a
//! blocking thread. A `walltime` resource (seconds) bounds each job's run
//! time; jobs exceeding it, or whose execution is lost, end up `Expired`.

use super::state_machine::{apply_transition, JobTransition};
use super::{JobId, JobQueue, JobState, JobStatus};
use crate::config::QueueResources;
use crate::dispatch::{unit_log_name, ErrorRecord, JobResult, WorkUnit, WorkWrapper};
use crate::error::{ErrorCode, ErrorExt, ParmapError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Persisted state of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub index: usize,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl JobRecord {
    fn new(id: JobId, index: usize) -> Self {
        Self {
            id,
            index,
            state: JobState::Submitted,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            result: None,
        }
    }

    fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id,
            index: self.index,
            state: self.state,
            started: self.started_at.is_some(),
            error: self.error.clone(),
        }
    }
}

struct JobEntry {
    record: JobRecord,
    task: Option<AbortHandle>,
}

type JobTable = BTreeMap<JobId, JobEntry>;

/// Shared state reachable from running job tasks
struct Registry {
    root: PathBuf,
    jobs: Mutex<JobTable>,
}

impl Registry {
    fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    fn record_path(&self, id: JobId) -> PathBuf {
        self.jobs_dir().join(format!("{:05}.json", id.0))
    }

    async fn persist(&self, record: &JobRecord) -> Result<()> {
        let path = self.record_path(record.id);
        let content = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&path, content)
            .await
            .to_storage_error(format!("Failed to write job record {}", path.display()))
    }

    /// Apply `transition` to job `id`, updating `record` with `update` on
    /// success. Transitions rejected by the state machine are ignored.
    ///
    /// The in-memory record only changes once the new record is persisted.
    async fn transition<F>(&self, id: JobId, transition: JobTransition, update: F) -> Result<bool>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.jobs.lock().await;
        let Some(entry) = jobs.get_mut(&id) else {
            return Ok(false);
        };

        match apply_transition(entry.record.state, transition) {
            Ok(next) => {
                let mut record = entry.record.clone();
                record.state = next;
                update(&mut record);
                self.persist(&record).await?;

                entry.record = record;
                if next.is_terminal() {
                    entry.task = None;
                }
                Ok(true)
            }
            Err(e) => {
                debug!("Job {}: {}", id, e);
                Ok(false)
            }
        }
    }

    /// Expire a job whose execution was lost. The record file is updated
    /// when possible; the in-memory state changes regardless.
    async fn expire_lost(&self, id: JobId) {
        let mut jobs = self.jobs.lock().await;
        let Some(entry) = jobs.get_mut(&id) else {
            return;
        };
        let Ok(next) = apply_transition(entry.record.state, JobTransition::Expire) else {
            return;
        };

        entry.record.state = next;
        entry.record.finished_at = Some(Utc::now());
        entry.task = None;
        if let Err(e) = self.persist(&entry.record).await {
            debug!("Job {}: expired record not written: {}", id, e);
        }
    }
}

fn walltime(resources: &QueueResources) -> Option<Duration> {
    let seconds = resources.get("walltime")?.as_f64()?;
    (seconds > 0.0).then(|| Duration::from_secs_f64(seconds))
}

async fn run_job(
    registry: Arc<Registry>,
    slots: Arc<Semaphore>,
    id: JobId,
    unit: WorkUnit,
    wrapper: WorkWrapper,
    limit: Option<Duration>,
) -> Result<()> {
    let _permit = slots.acquire_owned().await.map_err(|e| {
        ParmapError::backend_with_code(ErrorCode::BACKEND_GENERIC, "Job slots closed", "queue")
            .with_source(e)
    })?;

    let started = registry
        .transition(id, JobTransition::Start, |record| {
            record.started_at = Some(Utc::now());
        })
        .await?;
    if !started {
        return Ok(());
    }
    debug!("Job {} started for unit {}", id, unit.number());

    let execution = tokio::task::spawn_blocking(move || wrapper.call(&unit));
    let outcome = match limit {
        Some(limit) => match tokio::time::timeout(limit, execution).await {
            Ok(joined) => joined.ok(),
            Err(_) => {
                debug!("Job {} exceeded its walltime of {:?}", id, limit);
                None
            }
        },
        None => execution.await.ok(),
    };

    let finished = Some(Utc::now());
    match outcome {
        Some(JobResult::Value(value)) => {
            registry
                .transition(id, JobTransition::Finish, |record| {
                    record.result = Some(value);
                    record.finished_at = finished;
                })
                .await?;
        }
        Some(JobResult::Error(error)) => {
            registry
                .transition(id, JobTransition::Fail, |record| {
                    record.error = Some(error);
                    record.finished_at = finished;
                })
                .await?;
        }
        None => {
            registry
                .transition(id, JobTransition::Expire, |record| {
                    record.finished_at = finished;
                })
                .await?;
        }
    }
    Ok(())
}

/// A job registry on disk whose jobs run on at most `slots` local slots
pub struct DirectoryQueue {
    registry: Arc<Registry>,
    slots: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for DirectoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryQueue")
            .field("root", &self.registry.root)
            .field("slots", &self.slots.available_permits())
            .finish()
    }
}

impl DirectoryQueue {
    /// Create (or reuse) a registry at `root`
    pub async fn create(root: impl Into<PathBuf>, slots: usize) -> Result<Self> {
        let registry = Registry {
            root: root.into(),
            jobs: Mutex::new(BTreeMap::new()),
        };
        for dir in [registry.jobs_dir(), registry.logs_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .to_storage_error(format!("Failed to create registry directory {}", dir.display()))?;
        }
        debug!("Created job registry at {}", registry.root.display());

        Ok(Self {
            registry: Arc::new(registry),
            slots: Arc::new(Semaphore::new(slots.max(1))),
            next_id: AtomicU64::new(1),
        })
    }

    /// Stored record of job `id`
    pub async fn record(&self, id: JobId) -> Option<JobRecord> {
        let jobs = self.registry.jobs.lock().await;
        jobs.get(&id).map(|entry| entry.record.clone())
    }

    async fn reset_dir(dir: &Path) -> Result<()> {
        if dir.exists() {
            tokio::fs::remove_dir_all(dir)
                .await
                .to_storage_error(format!("Failed to clear {}", dir.display()))?;
        }
        tokio::fs::create_dir_all(dir)
            .await
            .to_storage_error(format!("Failed to create {}", dir.display()))
    }
}

#[async_trait]
impl JobQueue for DirectoryQueue {
    fn file_dir(&self) -> &Path {
        &self.registry.root
    }

    async fn job_ids(&self) -> Result<Vec<JobId>> {
        let jobs = self.registry.jobs.lock().await;
        Ok(jobs.keys().copied().collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut jobs = self.registry.jobs.lock().await;
        for entry in jobs.values_mut() {
            if let Some(task) = entry.task.take() {
                task.abort();
            }
        }
        jobs.clear();
        drop(jobs);

        Self::reset_dir(&self.registry.jobs_dir()).await?;
        Self::reset_dir(&self.registry.logs_dir()).await
    }

    async fn submit(
        &self,
        units: &[WorkUnit],
        wrapper: &WorkWrapper,
        resources: &QueueResources,
    ) -> Result<Vec<JobId>> {
        let limit = walltime(resources);
        let wrapper = wrapper
            .clone()
            .with_log_dir(Some(self.registry.logs_dir()));

        let mut jobs = self.registry.jobs.lock().await;
        let mut ids = Vec::with_capacity(units.len());
        for unit in units {
            let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
            let record = JobRecord::new(id, unit.index);
            self.registry.persist(&record).await?;

            let task = tokio::spawn(run_job(
                self.registry.clone(),
                self.slots.clone(),
                id,
                unit.clone(),
                wrapper.clone(),
                limit,
            ));
            jobs.insert(
                id,
                JobEntry {
                    record,
                    task: Some(task.abort_handle()),
                },
            );
            let registry = self.registry.clone();
            tokio::spawn(async move {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("Job {} could not record its state: {}", id, e);
                        registry.expire_lost(id).await;
                    }
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => {
                        warn!("Job {} was lost: {}", id, e);
                        registry.expire_lost(id).await;
                    }
                }
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn status(&self, ids: &[JobId]) -> Result<Vec<JobStatus>> {
        let jobs = self.registry.jobs.lock().await;
        ids.iter()
            .map(|id| {
                jobs.get(id).map(|entry| entry.record.status()).ok_or_else(|| {
                    ParmapError::backend_with_code(
                        ErrorCode::BACKEND_GENERIC,
                        format!("Job {} is not registered", id),
                        "queue",
                    )
                })
            })
            .collect()
    }

    async fn kill(&self, ids: &[JobId]) -> Result<Vec<JobId>> {
        let mut killed = Vec::new();
        for id in ids {
            let task = {
                let mut jobs = self.registry.jobs.lock().await;
                jobs.get_mut(id).and_then(|entry| entry.task.take())
            };
            let done = self
                .registry
                .transition(*id, JobTransition::Kill, |record| {
                    record.finished_at = Some(Utc::now());
                })
                .await?;
            if let Some(task) = task {
                task.abort();
            }
            if done {
                killed.push(*id);
            }
        }
        debug!("Killed {} of {} jobs", killed.len(), ids.len());
        Ok(killed)
    }

    async fn log(&self, id: JobId) -> Result<Option<String>> {
        let index = {
            let jobs = self.registry.jobs.lock().await;
            match jobs.get(&id) {
                Some(entry) => entry.record.index,
                None => return Ok(None),
            }
        };
        let path = self.registry.logs_dir().join(unit_log_name(index));
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ParmapError::from(e).with_context(path.display())),
        }
    }

    async fn result(&self, id: JobId) -> Result<Option<Value>> {
        let jobs = self.registry.jobs.lock().await;
        Ok(jobs
            .get(&id)
            .filter(|entry| entry.record.state == JobState::Done)
            .and_then(|entry| entry.record.result.clone()))
    }

    async fn remove(&self) -> Result<()> {
        self.clear().await?;
        let root = &self.registry.root;
        if root.exists() {
            tokio::fs::remove_dir_all(root)
                .await
                .to_storage_error(format!("Failed to remove registry {}", root.display()))?;
        }
        debug!("Removed job registry {}", root.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{unit_fn, Bindings, UnitFn};
    use serde_json::json;
    use tempfile::TempDir;

    fn units(n: usize) -> Vec<WorkUnit> {
        (0..n).map(|i| WorkUnit::new(i, vec![json!(i)])).collect()
    }

    async fn wait_terminal(queue: &DirectoryQueue, ids: &[JobId]) -> Vec<JobStatus> {
        loop {
            let statuses = queue.status(ids).await.unwrap();
            if statuses.iter().all(|s| s.state.is_terminal()) {
                return statuses;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn wrapper(fun: UnitFn) -> WorkWrapper {
        WorkWrapper::new(fun, Bindings::default())
    }

    #[tokio::test]
    async fn test_jobs_run_to_done_with_records() {
        let dir = TempDir::new().unwrap();
        let queue = DirectoryQueue::create(dir.path().join("reg"), 2).await.unwrap();
        let fun = unit_fn(|args, _| Ok(json!(args[0].as_u64().unwrap_or_default() * 10)));

        let ids = queue
            .submit(&units(3), &wrapper(fun), &QueueResources::new())
            .await
            .unwrap();
        let statuses = wait_terminal(&queue, &ids).await;

        assert!(statuses.iter().all(|s| s.state == JobState::Done && s.started));
        assert_eq!(queue.result(ids[2]).await.unwrap(), Some(json!(20)));
        assert!(dir.path().join("reg/jobs/00001.json").exists());

        let record = queue.record(ids[0]).await.unwrap();
        assert!(record.finished_at.is_some());
        assert!(queue.log(ids[1]).await.unwrap().unwrap().contains("Job time in seconds"));
    }

    #[tokio::test]
    async fn test_failed_job_keeps_error() {
        let dir = TempDir::new().unwrap();
        let queue = DirectoryQueue::create(dir.path(), 1).await.unwrap();
        let fun = unit_fn(|_, _| Err(anyhow::anyhow!("no convergence")));

        let ids = queue
            .submit(&units(1), &wrapper(fun), &QueueResources::new())
            .await
            .unwrap();
        let statuses = wait_terminal(&queue, &ids).await;

        assert_eq!(statuses[0].state, JobState::Error);
        assert_eq!(statuses[0].error.as_ref().unwrap().message, "no convergence");
        assert_eq!(queue.result(ids[0]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_walltime_expires_jobs() {
        let dir = TempDir::new().unwrap();
        let queue = DirectoryQueue::create(dir.path(), 1).await.unwrap();
        let fun = unit_fn(|_, _| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(json!(1))
        });
        let mut resources = QueueResources::new();
        resources.insert("walltime".to_string(), json!(0.05));

        let ids = queue.submit(&units(1), &wrapper(fun), &resources).await.unwrap();
        let statuses = wait_terminal(&queue, &ids).await;
        assert_eq!(statuses[0].state, JobState::Expired);
        assert!(statuses[0].error.is_none());
    }

    #[tokio::test]
    async fn test_kill_pending_jobs() {
        let dir = TempDir::new().unwrap();
        let queue = DirectoryQueue::create(dir.path(), 1).await.unwrap();
        let fun = unit_fn(|_, _| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(json!(1))
        });

        let ids = queue
            .submit(&units(4), &wrapper(fun), &QueueResources::new())
            .await
            .unwrap();
        let killed = queue.kill(&ids).await.unwrap();
        assert_eq!(killed.len(), 4);

        let statuses = queue.status(&ids).await.unwrap();
        assert!(statuses.iter().all(|s| s.state == JobState::Killed));
        assert!(queue.kill(&ids).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_and_remove() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("reg");
        let queue = DirectoryQueue::create(&root, 1).await.unwrap();
        let fun = unit_fn(|_, _| Ok(json!(null)));

        let ids = queue
            .submit(&units(2), &wrapper(fun), &QueueResources::new())
            .await
            .unwrap();
        wait_terminal(&queue, &ids).await;
        queue.clear().await.unwrap();
        assert!(queue.job_ids().await.unwrap().is_empty());
        assert!(root.join("jobs").read_dir().unwrap().next().is_none());

        queue.remove().await.unwrap();
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_jobs_that_cannot_record_state_expire() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("reg");
        let queue = DirectoryQueue::create(&root, 1).await.unwrap();
        let jobs_dir = root.join("jobs");
        let fun = unit_fn(move |args, _| {
            if args[0] == json!(0) {
                std::fs::remove_dir_all(&jobs_dir)?;
            }
            Ok(args[0].clone())
        });

        let ids = queue
            .submit(&units(2), &wrapper(fun), &QueueResources::new())
            .await
            .unwrap();
        let statuses = tokio::time::timeout(Duration::from_secs(5), wait_terminal(&queue, &ids))
            .await
            .expect("jobs never reached a terminal state");

        assert!(statuses.iter().all(|s| s.state == JobState::Expired));
        assert_eq!(queue.result(ids[0]).await.unwrap(), None);
    }
}
