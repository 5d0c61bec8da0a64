//! Child process execution used by command units

pub mod builder;
pub mod error;
pub mod mock;
pub mod runner;

pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use mock::{MockCommandConfig, MockProcessRunner};
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};

use std::sync::Arc;
use tokio::runtime::Handle;

#[derive(Clone)]
pub struct SubprocessManager {
    runner: Arc<dyn ProcessRunner>,
}

impl SubprocessManager {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    pub fn production() -> Self {
        Self::new(Arc::new(TokioProcessRunner))
    }

    pub fn mock() -> (Self, MockProcessRunner) {
        let mock = MockProcessRunner::new();
        let runner = Arc::new(mock.clone()) as Arc<dyn ProcessRunner>;
        (Self::new(runner), mock)
    }

    pub fn runner(&self) -> Arc<dyn ProcessRunner> {
        Arc::clone(&self.runner)
    }

    /// Run `command` to completion from a synchronous worker thread.
    ///
    /// The thread must have a tokio runtime entered and must not be driving
    /// async tasks itself; blocking pool threads and cluster node threads
    /// qualify.
    pub fn run_blocking(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let handle =
            Handle::try_current().map_err(|_| ProcessError::NoRuntime(command.display()))?;
        let runner = self.runner();
        handle.block_on(async move { runner.run(command).await })
    }
}
