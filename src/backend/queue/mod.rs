//! Batch queue backends
//!
//! A queue backend submits each unit as a job to an external batch system
//! ([`JobQueue`]) and drives those jobs to a terminal state with the
//! [`LifecycleController`]. The crate ships [`DirectoryQueue`], a registry
//! on disk whose jobs run on local job slots.

use crate::dispatch::{ErrorRecord, WorkUnit, WorkWrapper};
use crate::config::QueueResources;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;

pub mod adapter;
pub mod lifecycle;
pub mod registry;
pub mod state_machine;

pub use adapter::QueueBackend;
pub use lifecycle::{LifecycleController, ABORT_NOTE};
pub use registry::{DirectoryQueue, JobRecord};
pub use state_machine::{apply_transition, JobTransition, StateError};

/// Identifier of a job in a queue registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Submitted,
    Running,
    Done,
    Error,
    Expired,
    Killed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Done | JobState::Error | JobState::Expired | JobState::Killed
        )
    }

    /// Terminal without a retrievable result
    pub fn is_failure(&self) -> bool {
        matches!(self, JobState::Error | JobState::Expired)
    }

    /// Still holding resources on the batch system
    pub fn is_on_system(&self) -> bool {
        matches!(self, JobState::Submitted | JobState::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Submitted => "submitted",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Error => "error",
            JobState::Expired => "expired",
            JobState::Killed => "killed",
        };
        f.write_str(name)
    }
}

/// Snapshot of one job as reported by the queue
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub id: JobId,
    /// Position of the job's unit in the input
    pub index: usize,
    pub state: JobState,
    /// Whether the job ever started running
    pub started: bool,
    /// Captured failure of an `Error` job
    pub error: Option<ErrorRecord>,
}

/// Generation of the batch queue integration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueGeneration {
    /// Wipes the registry before each call, retries submission, keeps logs
    /// of terminated jobs
    Legacy,
    /// Clears a non-empty registry, submits once, keeps logs of every
    /// started job
    Current,
}

impl QueueGeneration {
    /// Additional submission attempts after a failed one
    pub fn submit_retries(&self) -> usize {
        match self {
            QueueGeneration::Legacy => 15,
            QueueGeneration::Current => 0,
        }
    }

    /// Whether the job's log is copied to the call's log directory
    pub fn keeps_log(&self, status: &JobStatus) -> bool {
        match self {
            QueueGeneration::Legacy => status.state.is_terminal() && status.state != JobState::Killed,
            QueueGeneration::Current => status.started,
        }
    }
}

/// Contract of an external batch system holding the jobs of one session
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Directory holding the registry's files
    fn file_dir(&self) -> &Path;

    /// Ids of every job currently registered
    async fn job_ids(&self) -> Result<Vec<JobId>>;

    /// Forget every registered job, stopping any still running
    async fn clear(&self) -> Result<()>;

    /// Submit one job per unit; ids are returned in unit order
    async fn submit(
        &self,
        units: &[WorkUnit],
        wrapper: &WorkWrapper,
        resources: &QueueResources,
    ) -> Result<Vec<JobId>>;

    async fn status(&self, ids: &[JobId]) -> Result<Vec<JobStatus>>;

    /// Kill jobs still on the system; returns the ids actually killed
    async fn kill(&self, ids: &[JobId]) -> Result<Vec<JobId>>;

    /// Captured output of a job, if any was written
    async fn log(&self, id: JobId) -> Result<Option<String>>;

    /// Result value of a `Done` job
    async fn result(&self, id: JobId) -> Result<Option<Value>>;

    /// Remove the registry and its files
    async fn remove(&self) -> Result<()>;
}
