//! The mapping pipeline
//!
//! A call flows through four stages:
//!
//! 1. [`selector`] decides between sequential and parallel execution
//! 2. [`wrapper`] turns the user function into one that never fails
//! 3. a backend runs every unit and returns ordered [`JobResult`]s
//! 4. [`assembler`] aborts or imputes, names and simplifies

pub mod assembler;
pub mod inputs;
pub mod logs;
pub mod options;
pub mod selector;
pub mod simplify;
pub mod wrapper;

pub use assembler::{assemble, collect_failures};
pub use inputs::{Inputs, WorkUnit};
pub use logs::{unit_log_name, FileLogSink, LogSink};
pub use options::{ImputeError, MapOptions, Simplify};
pub use selector::{select_path, validate_level, ExecutionPath};
pub use simplify::{Collection, MapResult};
pub use wrapper::{
    on_worker, unit_fn, Bindings, ErrorRecord, FailureKind, JobResult, UnitFn, WorkWrapper,
    WorkerScope, EXPIRED_MESSAGE,
};

use crate::backend::{local, ExecutionBackend, LocalBackend, Workload};
use crate::error::{ErrorExt, ParmapError, Result};
use crate::session::BackendConfig;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Session state captured for one mapping call
#[derive(Clone)]
pub struct CallContext {
    pub config: BackendConfig,
    pub backend: Arc<dyn ExecutionBackend>,
    pub registered_levels: BTreeSet<String>,
    pub exports: BTreeMap<String, Value>,
    /// Log directory of this call when logging is enabled
    pub log_dir: Option<PathBuf>,
}

/// The message announcing a parallel call
pub fn info_message(config: &BackendConfig, level: Option<&str>, elements: usize) -> String {
    format!(
        "Mapping in parallel{}: mode={}; level={}; cpus={}; elements={}.",
        if config.load_balancing {
            " (load balanced)"
        } else {
            ""
        },
        config.mode,
        level.unwrap_or("none"),
        config.cpus,
        elements
    )
}

fn local_workload(fun: UnitFn, bindings: Bindings, inputs: &Inputs, options: &MapOptions) -> Workload {
    Workload {
        units: inputs.units(),
        wrapper: WorkWrapper::new(fun, bindings),
        imputing: options.imputing(),
        log_dir: None,
    }
}

async fn run_parallel(
    ctx: &CallContext,
    fun: UnitFn,
    bindings: Bindings,
    inputs: &Inputs,
    options: &MapOptions,
) -> Result<Vec<JobResult>> {
    if options.show_info.unwrap_or(ctx.config.show_info) {
        info!(
            "{}",
            info_message(&ctx.config, options.level.as_deref(), inputs.len())
        );
    }

    if let Some(dir) = &ctx.log_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .to_storage_error(format!("Failed to create log directory {}", dir.display()))?;
    }

    let workload = Workload {
        units: inputs.units(),
        wrapper: WorkWrapper::new(fun, bindings).with_log_dir(ctx.log_dir.clone()),
        imputing: options.imputing(),
        log_dir: ctx.log_dir.clone(),
    };
    ctx.backend.run_all(workload).await
}

/// Map `fun` over `inputs`
pub async fn dispatch(
    ctx: CallContext,
    fun: UnitFn,
    inputs: &Inputs,
    options: &MapOptions,
) -> Result<MapResult> {
    let path = select_path(
        &ctx.config,
        &ctx.registered_levels,
        options.level.as_deref(),
        on_worker(),
    )?;
    debug!("Mapping {} units on the {} path", inputs.len(), path);

    let bindings = Bindings::new(options.more_args.clone(), ctx.exports.clone());
    let results = match path {
        ExecutionPath::Local => {
            LocalBackend
                .run_all(local_workload(fun, bindings, inputs, options))
                .await?
        }
        ExecutionPath::Parallel => run_parallel(&ctx, fun, bindings, inputs, options).await?,
    };

    assemble(results, inputs, options)
}

/// Map `fun` over `inputs` from synchronous code, typically a unit body.
///
/// Calls that resolve to the local path run inline on the current thread.
/// Parallel calls are driven to completion on the ambient tokio runtime, or
/// on a temporary one when none is entered; this must not be called from
/// inside an async task.
pub fn dispatch_blocking(
    ctx: CallContext,
    fun: UnitFn,
    inputs: &Inputs,
    options: &MapOptions,
) -> Result<MapResult> {
    let path = select_path(
        &ctx.config,
        &ctx.registered_levels,
        options.level.as_deref(),
        on_worker(),
    )?;

    match path {
        ExecutionPath::Local => {
            debug!("Mapping {} units inline", inputs.len());
            let bindings = Bindings::new(options.more_args.clone(), ctx.exports.clone());
            let workload = local_workload(fun, bindings, inputs, options);
            let results = local::run_sequential(&workload.units, &workload.wrapper);
            assemble(results, inputs, options)
        }
        ExecutionPath::Parallel => match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle.block_on(dispatch(ctx, fun, inputs, options)),
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| ParmapError::backend("Failed to start a runtime").with_source(e))?;
                runtime.block_on(dispatch(ctx, fun, inputs, options))
            }
        },
    }
}
