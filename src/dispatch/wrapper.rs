//! Work wrapper: runs the user function for one unit and turns every
//! failure into a value.
//!
//! Backends never see a unit fail. They get a [`JobResult`] back for every
//! unit, which keeps fan-out primitives from aborting on the first error.
//! The wrapper also marks the executing thread as a worker so that nested
//! mapping calls made by the user function run sequentially.

use super::inputs::WorkUnit;
use super::logs::{write_trailer, FileLogSink, LogSink, UnitLog};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Message recorded for jobs that never reported back
pub const EXPIRED_MESSAGE: &str = "Job expired!";

/// The function mapped over the inputs.
///
/// It receives the unit's positional arguments (one per input vector) and
/// the call's [`Bindings`].
pub type UnitFn = Arc<dyn Fn(&[Value], &Bindings) -> anyhow::Result<Value> + Send + Sync>;

/// Box a closure as a [`UnitFn`]
pub fn unit_fn<F>(f: F) -> UnitFn
where
    F: Fn(&[Value], &Bindings) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Named values visible to the user function.
///
/// Per-call extra arguments shadow session exports of the same name.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    more_args: Arc<Map<String, Value>>,
    exports: Arc<BTreeMap<String, Value>>,
}

impl Bindings {
    pub fn new(more_args: Map<String, Value>, exports: BTreeMap<String, Value>) -> Self {
        Self {
            more_args: Arc::new(more_args),
            exports: Arc::new(exports),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.more_args
            .get(name)
            .or_else(|| self.exports.get(name))
    }

    pub fn more_args(&self) -> &Map<String, Value> {
        &self.more_args
    }

    pub fn exports(&self) -> &BTreeMap<String, Value> {
        &self.exports
    }
}

/// How a unit failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The function returned an error
    Raised,
    /// The function panicked
    Panicked,
    /// The job never reported a result
    Expired,
}

/// A captured unit failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Messages of the underlying causes, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
    pub kind: FailureKind,
}

impl ErrorRecord {
    pub fn raised(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            causes: Vec::new(),
            kind: FailureKind::Raised,
        }
    }

    pub fn expired() -> Self {
        Self {
            message: EXPIRED_MESSAGE.to_string(),
            causes: Vec::new(),
            kind: FailureKind::Expired,
        }
    }

    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            causes: err.chain().skip(1).map(ToString::to_string).collect(),
            kind: FailureKind::Raised,
        }
    }

    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unit panicked".to_string()
        };
        Self {
            message,
            causes: Vec::new(),
            kind: FailureKind::Panicked,
        }
    }

    /// The record as a JSON value, for imputation functions that keep it
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::String(self.message.clone()))
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for cause in &self.causes {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

/// Outcome of one wrapped unit invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "payload", rename_all = "snake_case")]
pub enum JobResult {
    Value(Value),
    Error(ErrorRecord),
}

impl JobResult {
    pub fn is_error(&self) -> bool {
        matches!(self, JobResult::Error(_))
    }

    pub fn error(&self) -> Option<&ErrorRecord> {
        match self {
            JobResult::Error(record) => Some(record),
            JobResult::Value(_) => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            JobResult::Value(value) => Some(value),
            JobResult::Error(_) => None,
        }
    }
}

thread_local! {
    static ON_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is executing a unit
pub fn on_worker() -> bool {
    ON_WORKER.with(Cell::get)
}

/// Marks the current thread as a worker until dropped
#[must_use = "the worker flag is cleared when the scope is dropped"]
pub struct WorkerScope {
    previous: bool,
}

impl WorkerScope {
    pub fn enter() -> Self {
        let previous = ON_WORKER.with(|flag| flag.replace(true));
        Self { previous }
    }
}

impl Drop for WorkerScope {
    fn drop(&mut self) {
        ON_WORKER.with(|flag| flag.set(self.previous));
    }
}

/// A user function bound to its call environment, ready to run units
#[derive(Clone)]
pub struct WorkWrapper {
    fun: UnitFn,
    bindings: Bindings,
    log_dir: Option<PathBuf>,
    sink: Arc<dyn LogSink>,
}

impl fmt::Debug for WorkWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkWrapper")
            .field("bindings", &self.bindings)
            .field("log_dir", &self.log_dir)
            .finish_non_exhaustive()
    }
}

impl WorkWrapper {
    pub fn new(fun: UnitFn, bindings: Bindings) -> Self {
        Self {
            fun,
            bindings,
            log_dir: None,
            sink: Arc::new(FileLogSink),
        }
    }

    /// Capture each unit's output in `dir` when set
    pub fn with_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Run the function on one unit. Never panics and never returns early
    /// without restoring the worker flag and log routing.
    pub fn call(&self, unit: &WorkUnit) -> JobResult {
        let _worker = WorkerScope::enter();
        match &self.log_dir {
            Some(dir) => self.invoke_logged(dir, unit),
            None => self.invoke(unit),
        }
    }

    fn invoke(&self, unit: &WorkUnit) -> JobResult {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            (self.fun)(&unit.args, &self.bindings)
        }));

        match outcome {
            Ok(Ok(value)) => JobResult::Value(value),
            Ok(Err(err)) => JobResult::Error(ErrorRecord::from_error(&err)),
            Err(payload) => JobResult::Error(ErrorRecord::from_panic(payload)),
        }
    }

    fn invoke_logged(&self, dir: &Path, unit: &WorkUnit) -> JobResult {
        let log = match self.sink.open(dir, unit.index) {
            Ok(sink) => UnitLog::new(sink),
            Err(e) => {
                warn!(
                    "Cannot open log for unit {} in {}: {}",
                    unit.number(),
                    dir.display(),
                    e
                );
                return self.invoke(unit);
            }
        };

        let started = Instant::now();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_target(false)
            .finish();

        let result = tracing::subscriber::with_default(subscriber, || self.invoke(unit));

        let mut log = log;
        if let JobResult::Error(record) = &result {
            if let Err(e) = std::io::Write::write_fmt(&mut log, format_args!("Error: {}\n", record))
            {
                warn!("Cannot write log for unit {}: {}", unit.number(), e);
            }
        }
        if let Err(e) = write_trailer(&mut log, started.elapsed()) {
            warn!("Cannot write log for unit {}: {}", unit.number(), e);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};
    use serde_json::json;
    use tempfile::TempDir;

    fn double() -> UnitFn {
        unit_fn(|args, _| {
            let n = args[0].as_i64().ok_or_else(|| anyhow!("not a number"))?;
            Ok(json!(n * 2))
        })
    }

    #[test]
    fn test_success_is_value() {
        let wrapper = WorkWrapper::new(double(), Bindings::default());
        let result = wrapper.call(&WorkUnit::new(0, vec![json!(21)]));
        assert_eq!(result, JobResult::Value(json!(42)));
    }

    #[test]
    fn test_error_is_captured_with_causes() {
        let fun = unit_fn(|_, _| {
            Err(anyhow!("disk full")).context("writing checkpoint")
        });
        let wrapper = WorkWrapper::new(fun, Bindings::default());
        let result = wrapper.call(&WorkUnit::new(0, vec![json!(1)]));

        let record = result.error().unwrap();
        assert_eq!(record.message, "writing checkpoint");
        assert_eq!(record.causes, vec!["disk full".to_string()]);
        assert_eq!(record.kind, FailureKind::Raised);
        assert_eq!(record.to_string(), "writing checkpoint: disk full");
    }

    #[test]
    fn test_panic_is_captured() {
        let fun = unit_fn(|_, _| panic!("unit exploded"));
        let wrapper = WorkWrapper::new(fun, Bindings::default());
        let result = wrapper.call(&WorkUnit::new(3, vec![]));

        let record = result.error().unwrap();
        assert_eq!(record.kind, FailureKind::Panicked);
        assert_eq!(record.message, "unit exploded");
    }

    #[test]
    fn test_worker_flag_set_during_call_and_restored() {
        let fun = unit_fn(|_, _| Ok(json!(on_worker())));
        let wrapper = WorkWrapper::new(fun, Bindings::default());

        assert!(!on_worker());
        let result = wrapper.call(&WorkUnit::new(0, vec![]));
        assert_eq!(result, JobResult::Value(json!(true)));
        assert!(!on_worker());

        let failing = WorkWrapper::new(unit_fn(|_, _| panic!("boom")), Bindings::default());
        failing.call(&WorkUnit::new(0, vec![]));
        assert!(!on_worker());
    }

    #[test]
    fn test_bindings_lookup_prefers_more_args() {
        let mut more = Map::new();
        more.insert("scale".to_string(), json!(10));
        let mut exports = BTreeMap::new();
        exports.insert("scale".to_string(), json!(1));
        exports.insert("offset".to_string(), json!(5));
        let bindings = Bindings::new(more, exports);

        let fun = unit_fn(|args, env| {
            let x = args[0].as_i64().unwrap_or_default();
            let scale = env.get("scale").and_then(Value::as_i64).unwrap_or(1);
            let offset = env.get("offset").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(x * scale + offset))
        });
        let wrapper = WorkWrapper::new(fun, bindings);
        assert_eq!(
            wrapper.call(&WorkUnit::new(0, vec![json!(2)])),
            JobResult::Value(json!(25))
        );
    }

    #[test]
    fn test_logged_unit_writes_output_and_trailer() {
        let dir = TempDir::new().unwrap();
        let fun = unit_fn(|args, _| {
            tracing::info!("processing {}", args[0]);
            Ok(args[0].clone())
        });
        let wrapper = WorkWrapper::new(fun, Bindings::default())
            .with_log_dir(Some(dir.path().to_path_buf()));

        let result = wrapper.call(&WorkUnit::new(4, vec![json!("item")]));
        assert_eq!(result, JobResult::Value(json!("item")));

        let content = std::fs::read_to_string(dir.path().join("00005.log")).unwrap();
        assert!(content.contains("processing \"item\""));
        assert!(content.contains("Job time in seconds: "));
        assert!(content.contains("Memory in use: "));
    }

    #[test]
    fn test_logged_failure_records_error_line() {
        let dir = TempDir::new().unwrap();
        let wrapper = WorkWrapper::new(unit_fn(|_, _| Err(anyhow!("bad input"))), Bindings::default())
            .with_log_dir(Some(dir.path().to_path_buf()));

        assert!(wrapper.call(&WorkUnit::new(0, vec![])).is_error());
        assert!(!on_worker());

        let content = std::fs::read_to_string(dir.path().join("00001.log")).unwrap();
        assert!(content.contains("Error: bad input"));
        assert!(content.contains("Job time in seconds: "));
    }

    #[test]
    fn test_job_result_serialization_is_tagged() {
        let value = serde_json::to_value(JobResult::Error(ErrorRecord::expired())).unwrap();
        assert_eq!(value["status"], json!("error"));
        assert_eq!(value["payload"]["message"], json!(EXPIRED_MESSAGE));
        assert_eq!(value["payload"]["kind"], json!("expired"));
    }
}
