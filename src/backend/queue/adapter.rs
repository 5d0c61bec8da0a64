//! Execution backend on top of a batch queue

use super::{DirectoryQueue, JobQueue, LifecycleController, QueueGeneration};
use crate::backend::{ExecutionBackend, Workload};
use crate::config::{Mode, QueueResources};
use crate::dispatch::JobResult;
use crate::error::{ErrorCode, ParmapError, Result};
use crate::session::{BackendConfig, SessionId};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Runs mapping calls as jobs on a [`JobQueue`].
///
/// Calls are serialized: the registry is shared and reset by every call.
pub struct QueueBackend {
    queue: Arc<dyn JobQueue>,
    generation: QueueGeneration,
    cpus: usize,
    poll_interval: Duration,
    resources: QueueResources,
    in_use: Mutex<()>,
}

impl std::fmt::Debug for QueueBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueBackend")
            .field("registry", &self.queue.file_dir())
            .field("generation", &self.generation)
            .field("cpus", &self.cpus)
            .finish()
    }
}

impl QueueBackend {
    /// Create the session's registry under the storage directory
    pub async fn start(config: &BackendConfig, session: &SessionId) -> Result<Self> {
        let generation = match config.mode {
            Mode::LegacyQueue => QueueGeneration::Legacy,
            Mode::Queue => QueueGeneration::Current,
            other => {
                return Err(ParmapError::config_with_code(
                    ErrorCode::CONFIG_UNKNOWN_MODE,
                    format!("Mode '{}' is not a queue mode", other),
                ))
            }
        };

        let root = config
            .storage_dir
            .join(format!("parmap-registry-{}", session.as_str()));
        let queue = DirectoryQueue::create(root, config.cpus).await?;
        Ok(Self::with_queue(Arc::new(queue), generation, config))
    }

    /// Drive an arbitrary queue implementation
    pub fn with_queue(
        queue: Arc<dyn JobQueue>,
        generation: QueueGeneration,
        config: &BackendConfig,
    ) -> Self {
        Self {
            queue,
            generation,
            cpus: config.cpus,
            poll_interval: config.poll_interval,
            resources: config.queue_resources.clone(),
            in_use: Mutex::new(()),
        }
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn generation(&self) -> QueueGeneration {
        self.generation
    }
}

#[async_trait]
impl ExecutionBackend for QueueBackend {
    fn mode(&self) -> Mode {
        match self.generation {
            QueueGeneration::Legacy => Mode::LegacyQueue,
            QueueGeneration::Current => Mode::Queue,
        }
    }

    fn cpus(&self) -> usize {
        self.cpus
    }

    async fn run_all(&self, workload: Workload) -> Result<Vec<JobResult>> {
        let _registry = self.in_use.lock().await;
        LifecycleController::new(
            self.queue.as_ref(),
            self.generation,
            self.poll_interval,
            &self.resources,
        )
        .run(workload)
        .await
    }

    async fn shutdown(&self) -> Result<()> {
        let _registry = self.in_use.lock().await;
        self.queue.remove().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParmapConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_registry_lives_under_storage_dir() {
        let dir = TempDir::new().unwrap();
        let config = BackendConfig::resolve(
            &ParmapConfig::new(Mode::LegacyQueue)
                .with_cpus(2)
                .with_storage_dir(dir.path()),
        )
        .unwrap();
        let session = SessionId::new();

        let backend = QueueBackend::start(&config, &session).await.unwrap();
        let registry = backend.queue().file_dir().to_path_buf();
        assert!(registry.starts_with(dir.path()));
        assert!(registry.is_dir());
        assert_eq!(backend.mode(), Mode::LegacyQueue);

        backend.shutdown().await.unwrap();
        assert!(!registry.exists());
    }

    #[tokio::test]
    async fn test_rejects_non_queue_mode() {
        let config = BackendConfig::resolve(&ParmapConfig::multicore(2)).unwrap();
        let err = QueueBackend::start(&config, &SessionId::new()).await.unwrap_err();
        assert!(err.is_configuration());
    }
}
