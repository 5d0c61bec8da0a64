//! Backend selection for one mapping call

use crate::error::{common, Result};
use crate::session::BackendConfig;
use std::collections::BTreeSet;
use std::fmt;

/// Where a mapping call executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    /// Sequentially on the calling thread
    Local,
    /// On the session's running backend
    Parallel,
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPath::Local => f.write_str("local"),
            ExecutionPath::Parallel => f.write_str("parallel"),
        }
    }
}

/// Fail when a requested level was never registered
pub fn validate_level(level: Option<&str>, registered: &BTreeSet<String>) -> Result<()> {
    match level {
        Some(level) if !registered.contains(level) => {
            let known: Vec<String> = registered.iter().cloned().collect();
            Err(common::unregistered_level(level, &known))
        }
        _ => Ok(()),
    }
}

/// Decide the execution path.
///
/// Level validation happens first so that a bad level fails the call even
/// when it would have run locally anyway. With an active level set, only
/// calls naming that same level are parallelized.
pub fn select_path(
    config: &BackendConfig,
    registered: &BTreeSet<String>,
    level: Option<&str>,
    on_worker: bool,
) -> Result<ExecutionPath> {
    validate_level(level, registered)?;

    if config.mode.is_local() || on_worker {
        return Ok(ExecutionPath::Local);
    }

    // An active level parallelizes only calls naming it; calls naming
    // another level or none at all run locally.
    if let Some(active) = config.level.as_deref() {
        if level != Some(active) {
            return Ok(ExecutionPath::Local);
        }
    }

    Ok(ExecutionPath::Parallel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::error::ErrorCode;

    fn parallel(level: Option<&str>) -> BackendConfig {
        BackendConfig {
            mode: Mode::Multicore,
            cpus: 2,
            level: level.map(str::to_string),
            ..BackendConfig::default()
        }
    }

    fn levels(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_local_mode_is_local() {
        let path = select_path(&BackendConfig::default(), &levels(&[]), None, false).unwrap();
        assert_eq!(path, ExecutionPath::Local);
    }

    #[test]
    fn test_parallel_mode_without_levels() {
        let path = select_path(&parallel(None), &levels(&[]), None, false).unwrap();
        assert_eq!(path, ExecutionPath::Parallel);
    }

    #[test]
    fn test_worker_flag_forces_local() {
        let path = select_path(&parallel(None), &levels(&[]), None, true).unwrap();
        assert_eq!(path, ExecutionPath::Local);
    }

    #[test]
    fn test_level_gate() {
        let registered = levels(&["tune.outer", "tune.inner"]);
        let config = parallel(Some("tune.outer"));

        assert_eq!(
            select_path(&config, &registered, Some("tune.outer"), false).unwrap(),
            ExecutionPath::Parallel
        );
        assert_eq!(
            select_path(&config, &registered, Some("tune.inner"), false).unwrap(),
            ExecutionPath::Local
        );
        assert_eq!(
            select_path(&config, &registered, None, false).unwrap(),
            ExecutionPath::Local
        );
    }

    #[test]
    fn test_active_level_keeps_unnamed_calls_local() {
        let config = parallel(Some("outer"));
        let path = select_path(&config, &levels(&["outer"]), None, false).unwrap();
        assert_eq!(path, ExecutionPath::Local);

        let path = select_path(&parallel(None), &levels(&["outer"]), None, false).unwrap();
        assert_eq!(path, ExecutionPath::Parallel);
    }

    #[test]
    fn test_unregistered_level_fails_even_in_local_mode() {
        let err = select_path(&BackendConfig::default(), &levels(&["a"]), Some("b"), false)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_UNREGISTERED_LEVEL);
        assert!(err.to_string().contains("registered levels: a"));
    }

    #[test]
    fn test_level_without_active_level_is_parallel() {
        let path = select_path(&parallel(None), &levels(&["a"]), Some("a"), false).unwrap();
        assert_eq!(path, ExecutionPath::Parallel);
    }
}
