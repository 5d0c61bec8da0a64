//! Per-call mapping options

use super::wrapper::ErrorRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{ErrorCode, ParmapError};

/// Replacement for a failed unit's result
#[derive(Clone)]
pub enum ImputeError {
    /// Every failed slot becomes this value
    Constant(Value),
    /// Every failed slot becomes the function applied to the captured failure
    Transform(Arc<dyn Fn(&ErrorRecord) -> Value + Send + Sync>),
}

impl ImputeError {
    pub fn constant(value: impl Into<Value>) -> Self {
        ImputeError::Constant(value.into())
    }

    pub fn transform<F>(f: F) -> Self
    where
        F: Fn(&ErrorRecord) -> Value + Send + Sync + 'static,
    {
        ImputeError::Transform(Arc::new(f))
    }

    /// Keep the captured failure itself as the slot's value
    pub fn keep_error() -> Self {
        Self::transform(ErrorRecord::to_value)
    }

    pub fn apply(&self, record: &ErrorRecord) -> Value {
        match self {
            ImputeError::Constant(value) => value.clone(),
            ImputeError::Transform(f) => f(record),
        }
    }
}

impl fmt::Debug for ImputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImputeError::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            ImputeError::Transform(_) => f.write_str("Transform(..)"),
        }
    }
}

/// Shape coercion applied to the assembled values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Simplify {
    #[default]
    None,
    /// Collapse to a vector or matrix when every value has the same length
    BestEffort,
    /// Like best-effort, but equally shaped nested arrays become a higher-rank array
    Array,
}

impl FromStr for Simplify {
    type Err = ParmapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "false" => Ok(Simplify::None),
            "best" | "best-effort" | "true" => Ok(Simplify::BestEffort),
            "array" => Ok(Simplify::Array),
            other => Err(ParmapError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("Unknown simplify mode '{}', expected none, best or array", other),
            )),
        }
    }
}

/// Options of one mapping call. Built once at call entry.
#[derive(Debug, Clone, Default)]
pub struct MapOptions {
    pub more_args: Map<String, Value>,
    pub simplify: Simplify,
    pub use_names: bool,
    pub impute_error: Option<ImputeError>,
    pub level: Option<String>,
    /// Overrides the session's `show_info` default when set
    pub show_info: Option<bool>,
}

impl MapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_more_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.more_args.insert(name.into(), value.into());
        self
    }

    pub fn with_more_args(mut self, more_args: Map<String, Value>) -> Self {
        self.more_args = more_args;
        self
    }

    pub fn with_simplify(mut self, simplify: Simplify) -> Self {
        self.simplify = simplify;
        self
    }

    pub fn with_use_names(mut self, use_names: bool) -> Self {
        self.use_names = use_names;
        self
    }

    pub fn with_impute_error(mut self, impute: ImputeError) -> Self {
        self.impute_error = Some(impute);
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn with_show_info(mut self, show: bool) -> Self {
        self.show_info = Some(show);
        self
    }

    pub fn imputing(&self) -> bool {
        self.impute_error.is_some()
    }
}
