//! Session context for parallel mapping
//!
//! A [`Session`] owns the running backend, the bindings exported to every
//! unit, the registered parallelization levels and the mapping-call counter.
//! It is cheap to clone; clones share the same state.

pub mod state;

pub use state::BackendConfig;

use crate::backend::{self, ExecutionBackend, LocalBackend};
use crate::config::{Mode, ParmapConfig};
use crate::dispatch::{self, CallContext, Inputs, MapOptions, MapResult, UnitFn};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique identifier for a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Running {
    config: BackendConfig,
    backend: Arc<dyn ExecutionBackend>,
}

impl Running {
    fn local() -> Self {
        Self {
            config: BackendConfig::default(),
            backend: Arc::new(LocalBackend),
        }
    }
}

struct SessionInner {
    id: SessionId,
    running: RwLock<Running>,
    exports: RwLock<BTreeMap<String, Value>>,
    levels: RwLock<BTreeSet<String>>,
    next_map: AtomicU64,
}

/// Handle to a mapping session
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A session in local mode
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: SessionId::new(),
                running: RwLock::new(Running::local()),
                exports: RwLock::new(BTreeMap::new()),
                levels: RwLock::new(BTreeSet::new()),
                next_map: AtomicU64::new(1),
            }),
        }
    }

    /// Start a session with `config`, see [`Session::start`]
    pub async fn with_config(config: ParmapConfig) -> Result<Self> {
        let session = Self::new();
        session.start(config).await?;
        Ok(session)
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    /// The active backend configuration
    pub fn config(&self) -> BackendConfig {
        self.read_running().config.clone()
    }

    pub fn mode(&self) -> Mode {
        self.read_running().config.mode
    }

    fn read_running(&self) -> std::sync::RwLockReadGuard<'_, Running> {
        self.inner
            .running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the backend described by `config`.
    ///
    /// A backend that is still running is stopped first.
    pub async fn start(&self, config: ParmapConfig) -> Result<()> {
        let resolved = BackendConfig::resolve(&config)?;

        if !self.mode().is_local() {
            warn!(
                "Parallelization was not stopped, doing it now ({} backend)",
                self.mode()
            );
            self.stop().await?;
        }

        if !config.registered_levels.is_empty() {
            let mut levels = self
                .inner
                .levels
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            levels.extend(config.registered_levels.iter().cloned());
        }

        let backend = backend::start(&resolved, &self.inner.id).await?;
        info!(
            "Starting parallelization in mode={} with cpus={}.",
            resolved.mode, resolved.cpus
        );

        let mut running = self
            .inner
            .running
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *running = Running {
            config: resolved,
            backend,
        };
        Ok(())
    }

    /// Shut the backend down and return to local mode
    pub async fn stop(&self) -> Result<()> {
        let previous = {
            let mut running = self
                .inner
                .running
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *running, Running::local())
        };

        if !previous.config.mode.is_local() {
            info!("Stopped parallelization. All cleaned up.");
        }
        previous.backend.shutdown().await
    }

    /// Make `value` visible to every unit as `name`
    pub fn export(&self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        debug!("Exporting binding '{}'", name);
        self.inner
            .exports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, value.into());
    }

    pub fn unexport(&self, name: &str) -> Option<Value> {
        self.inner
            .exports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn exports(&self) -> BTreeMap<String, Value> {
        self.inner
            .exports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register levels as `<namespace>.<level>`, or bare names without a
    /// namespace. Returns the registered names.
    pub fn register_levels<I, S>(&self, namespace: Option<&str>, levels: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = levels
            .into_iter()
            .map(|level| match namespace {
                Some(ns) => format!("{}.{}", ns, level.as_ref()),
                None => level.as_ref().to_string(),
            })
            .collect();

        self.inner
            .levels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(names.iter().cloned());
        names
    }

    pub fn registered_levels(&self) -> Vec<String> {
        self.inner
            .levels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Number the next mapping call will use for its log directory
    pub fn next_map(&self) -> u64 {
        self.inner.next_map.load(Ordering::SeqCst)
    }

    /// Directory holding the log directories of this session's calls
    pub fn log_root(&self) -> PathBuf {
        self.read_running()
            .config
            .storage_dir
            .join(format!("parmap-logs-{}", self.inner.id))
    }

    fn call_context(&self) -> CallContext {
        let (config, backend) = {
            let running = self.read_running();
            (running.config.clone(), running.backend.clone())
        };

        let log_dir = config.logging.then(|| {
            config
                .storage_dir
                .join(format!("parmap-logs-{}", self.inner.id))
                .join(format!("{:05}", self.next_map()))
        });

        CallContext {
            config,
            backend,
            registered_levels: self
                .inner
                .levels
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            exports: self.exports(),
            log_dir,
        }
    }

    fn finish<T>(&self, outcome: Result<T>) -> Result<T> {
        if outcome.is_ok() {
            self.inner.next_map.fetch_add(1, Ordering::SeqCst);
        }
        outcome
    }

    /// Map `fun` over `inputs` on the session's backend
    pub async fn map(&self, fun: UnitFn, inputs: &Inputs, options: &MapOptions) -> Result<MapResult> {
        let outcome = dispatch::dispatch(self.call_context(), fun, inputs, options).await;
        self.finish(outcome)
    }

    /// Blocking variant of [`Session::map`] for synchronous callers such as
    /// unit bodies. Nested calls from a unit always run sequentially.
    pub fn map_blocking(&self, fun: UnitFn, inputs: &Inputs, options: &MapOptions) -> Result<MapResult> {
        let outcome = dispatch::dispatch_blocking(self.call_context(), fun, inputs, options);
        self.finish(outcome)
    }
}
