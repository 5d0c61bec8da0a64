use std::fmt::Display;
use std::path::PathBuf;
use thiserror::Error;

pub mod codes;
pub mod helpers;

pub use codes::{describe_error_code, ErrorCode};
pub use helpers::{common, ErrorExt};

/// Maximum number of individual failures rendered into an abort message
pub const MAX_REPORTED_FAILURES: usize = 10;

/// One failed work unit, as reported in an [`ParmapError::Abort`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    /// Zero-based position of the unit in the input
    pub index: usize,
    /// Captured (or synthesized) failure message
    pub message: String,
}

impl UnitFailure {
    pub fn new(index: usize, message: impl Into<String>) -> Self {
        Self {
            index,
            message: message.into(),
        }
    }
}

/// The unified error type for parmap
#[derive(Error, Debug)]
pub enum ParmapError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Storage error: {message}")]
    Storage {
        code: u16,
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Execution error: {message}")]
    Execution {
        code: u16,
        message: String,
        command: Option<String>,
        exit_code: Option<i32>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] {}", render_abort(.failures, .note))]
    Abort {
        code: u16,
        failures: Vec<UnitFailure>,
        note: Option<String>,
    },

    #[error("[E{code:04}] Backend error: {message}")]
    Backend {
        code: u16,
        message: String,
        backend: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Validation error: {message}")]
    Validation {
        code: u16,
        message: String,
        field: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] {message}")]
    Other {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Render the aggregated failure message of an aborted mapping call.
///
/// Failures are listed by 1-based unit number in index order, at most
/// [`MAX_REPORTED_FAILURES`] of them.
pub fn abort_message(failures: &[UnitFailure], note: Option<&str>) -> String {
    let mut shown: Vec<&UnitFailure> = failures.iter().collect();
    shown.sort_by_key(|f| f.index);
    let lines: Vec<String> = shown
        .into_iter()
        .take(MAX_REPORTED_FAILURES)
        .map(|f| format!("{:05}: {}", f.index + 1, f.message))
        .collect();

    let mut message = format!(
        "Errors occurred in {} worker jobs, displaying at most {} of them:\n\n{}",
        failures.len(),
        MAX_REPORTED_FAILURES,
        lines.join("\n")
    );
    if let Some(note) = note {
        message.push('\n');
        message.push_str(note);
    }
    message
}

fn render_abort(failures: &[UnitFailure], note: &Option<String>) -> String {
    abort_message(failures, note.as_deref())
}

impl ParmapError {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            code: ErrorCode::CONFIG_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with specific code
    pub fn config_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error with default code
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            code: ErrorCode::STORAGE_GENERIC,
            message: message.into(),
            path: None,
            source: None,
        }
    }

    /// Create a storage error with specific code and path
    pub fn storage_with_code(code: u16, message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::Storage {
            code,
            message: message.into(),
            path,
            source: None,
        }
    }

    /// Create an execution error with default code
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            code: ErrorCode::EXEC_GENERIC,
            message: message.into(),
            command: None,
            exit_code: None,
            source: None,
        }
    }

    /// Create an execution error with specific code
    pub fn execution_with_code(
        code: u16,
        message: impl Into<String>,
        command: Option<String>,
    ) -> Self {
        Self::Execution {
            code,
            message: message.into(),
            command,
            exit_code: None,
            source: None,
        }
    }

    /// Create the aggregated failure of a mapping call
    pub fn abort(failures: Vec<UnitFailure>) -> Self {
        Self::Abort {
            code: ErrorCode::MAP_ABORTED,
            failures,
            note: None,
        }
    }

    /// Create the aggregated failure of a queue mapping call whose remaining
    /// jobs were killed
    pub fn abort_with_note(failures: Vec<UnitFailure>, note: impl Into<String>) -> Self {
        Self::Abort {
            code: ErrorCode::MAP_JOBS_KILLED,
            failures,
            note: Some(note.into()),
        }
    }

    /// Create a backend error with default code
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            code: ErrorCode::BACKEND_GENERIC,
            message: message.into(),
            backend: None,
            source: None,
        }
    }

    /// Create a backend error with specific code and backend name
    pub fn backend_with_code(code: u16, message: impl Into<String>, backend: &str) -> Self {
        Self::Backend {
            code,
            message: message.into(),
            backend: Some(backend.to_string()),
            source: None,
        }
    }

    /// Create a validation error with default code
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            code: ErrorCode::VALIDATION_GENERIC,
            message: message.into(),
            field: None,
            source: None,
        }
    }

    /// Create a validation error with specific code and field
    pub fn validation_with_code(
        code: u16,
        message: impl Into<String>,
        field: Option<String>,
    ) -> Self {
        Self::Validation {
            code,
            message: message.into(),
            field,
            source: None,
        }
    }

    /// Create a generic other error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            code: ErrorCode::OTHER_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error to this error
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        match &mut self {
            Self::Config { source: src, .. }
            | Self::Storage { source: src, .. }
            | Self::Execution { source: src, .. }
            | Self::Backend { source: src, .. }
            | Self::Validation { source: src, .. }
            | Self::Other { source: src, .. } => {
                *src = Some(source.into());
            }
            Self::Abort { .. } => {}
        }
        self
    }

    /// Add context to the error message
    pub fn with_context(mut self, context: impl Display) -> Self {
        match &mut self {
            Self::Config { message, .. }
            | Self::Storage { message, .. }
            | Self::Execution { message, .. }
            | Self::Backend { message, .. }
            | Self::Validation { message, .. }
            | Self::Other { message, .. } => {
                *message = format!("{}: {}", message, context);
            }
            Self::Abort { note, .. } => {
                *note = Some(match note.take() {
                    Some(existing) => format!("{}\n{}", existing, context),
                    None => context.to_string(),
                });
            }
        }
        self
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::Storage { .. } => 4,
            Self::Execution { .. } => 5,
            Self::Abort { .. } => 6,
            Self::Backend { .. } => 7,
            Self::Validation { .. } => 8,
            Self::Other { .. } => 1,
        }
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Storage { code, .. }
            | Self::Execution { code, .. }
            | Self::Abort { code, .. }
            | Self::Backend { code, .. }
            | Self::Validation { code, .. }
            | Self::Other { code, .. } => *code,
        }
    }

    /// Individual unit failures carried by an abort, empty otherwise
    pub fn failures(&self) -> &[UnitFailure] {
        match self {
            Self::Abort { failures, .. } => failures,
            _ => &[],
        }
    }

    /// Whether this error is the aggregated failure of a mapping call
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort { .. })
    }

    /// Whether this error was raised before any work was dispatched
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { message, .. } => format!("Configuration problem: {}", message),
            Self::Storage { message, path, .. } => {
                if let Some(p) = path {
                    format!("Storage error at {}: {}", p.display(), message)
                } else {
                    format!("Storage error: {}", message)
                }
            }
            Self::Execution {
                message, command, ..
            } => {
                if let Some(cmd) = command {
                    format!("Command '{}' failed: {}", cmd, message)
                } else {
                    format!("Execution error: {}", message)
                }
            }
            Self::Abort { failures, note, .. } => abort_message(failures, note.as_deref()),
            Self::Backend {
                message, backend, ..
            } => {
                if let Some(name) = backend {
                    format!("Backend '{}' failed: {}", name, message)
                } else {
                    format!("Backend error: {}", message)
                }
            }
            Self::Validation { message, field, .. } => {
                if let Some(f) = field {
                    format!("Validation error for '{}': {}", f, message)
                } else {
                    format!("Validation error: {}", message)
                }
            }
            Self::Other { message, .. } => message.clone(),
        }
    }

    /// Get a developer-friendly error message with full chain
    pub fn developer_message(&self) -> String {
        format!("{:#}", self)
    }
}

/// Type alias for Results using ParmapError
pub type Result<T> = std::result::Result<T, ParmapError>;

/// Type alias for application Results (using anyhow for flexibility)
pub type AppResult<T> = anyhow::Result<T>;

impl From<std::io::Error> for ParmapError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, message) = match err.kind() {
            ErrorKind::NotFound => (ErrorCode::STORAGE_NOT_FOUND, "File or directory not found"),
            ErrorKind::PermissionDenied => {
                (ErrorCode::STORAGE_PERMISSION_DENIED, "Permission denied")
            }
            ErrorKind::AlreadyExists => (ErrorCode::STORAGE_ALREADY_EXISTS, "Already exists"),
            ErrorKind::InvalidInput => (ErrorCode::VALIDATION_INVALID_INPUT, "Invalid input"),
            ErrorKind::InvalidData => (ErrorCode::VALIDATION_INVALID_DATA, "Invalid data"),
            ErrorKind::TimedOut => (ErrorCode::EXEC_TIMEOUT, "Operation timed out"),
            ErrorKind::Interrupted => (ErrorCode::EXEC_INTERRUPTED, "Operation interrupted"),
            _ => (ErrorCode::STORAGE_IO_ERROR, "IO operation failed"),
        };

        ParmapError::storage_with_code(code, message, None).with_source(err)
    }
}

impl From<toml::de::Error> for ParmapError {
    fn from(err: toml::de::Error) -> Self {
        ParmapError::config_with_code(ErrorCode::CONFIG_INVALID_TOML, "Invalid TOML syntax")
            .with_source(err)
    }
}

impl From<serde_json::Error> for ParmapError {
    fn from(err: serde_json::Error) -> Self {
        ParmapError::storage_with_code(
            ErrorCode::STORAGE_SERIALIZATION_ERROR,
            "Invalid JSON data",
            None,
        )
        .with_source(err)
    }
}

impl From<tokio::task::JoinError> for ParmapError {
    fn from(err: tokio::task::JoinError) -> Self {
        let message = if err.is_cancelled() {
            "Worker task was cancelled"
        } else {
            "Worker task panicked outside the work wrapper"
        };
        ParmapError::Backend {
            code: ErrorCode::BACKEND_WORKER_LOST,
            message: message.to_string(),
            backend: None,
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation_and_chaining() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "log dir");
        let err = ParmapError::storage("Cannot create log directory")
            .with_source(io_err)
            .with_context("while starting session");

        assert_eq!(err.code(), ErrorCode::STORAGE_GENERIC);
        assert!(err.to_string().contains("[E3000]"));
        assert!(err.user_message().contains("Cannot create log directory"));
        assert!(err.user_message().contains("while starting session"));
    }

    #[test]
    fn test_error_codes() {
        let err = ParmapError::config_with_code(
            ErrorCode::CONFIG_UNREGISTERED_LEVEL,
            "Level 'x' not registered",
        );
        assert_eq!(err.code(), ErrorCode::CONFIG_UNREGISTERED_LEVEL);
        assert_eq!(err.exit_code(), 2);
        assert!(err.is_configuration());
        assert!(!err.is_abort());
    }

    #[test]
    fn test_abort_message_lists_failures_by_unit_number() {
        let err = ParmapError::abort(vec![
            UnitFailure::new(4, "late failure"),
            UnitFailure::new(1, "boom"),
        ]);

        let text = err.to_string();
        assert!(text.starts_with("[E5000] Errors occurred in 2 worker jobs"));
        let first = text.find("00002: boom").unwrap();
        let second = text.find("00005: late failure").unwrap();
        assert!(first < second);
        assert_eq!(err.exit_code(), 6);
        assert_eq!(err.failures().len(), 2);
    }

    #[test]
    fn test_abort_message_caps_reported_failures() {
        let failures = (0..25)
            .map(|i| UnitFailure::new(i, format!("failure {}", i)))
            .collect();
        let err = ParmapError::abort(failures);
        let text = err.user_message();

        assert!(text.contains("Errors occurred in 25 worker jobs"));
        assert!(text.contains("00010: failure 9"));
        assert!(!text.contains("00011: failure 10"));
    }

    #[test]
    fn test_abort_note_is_appended() {
        let err = ParmapError::abort_with_note(
            vec![UnitFailure::new(0, "Job expired!")],
            "remaining jobs were killed",
        );
        assert_eq!(err.code(), ErrorCode::MAP_JOBS_KILLED);
        assert!(err
            .to_string()
            .ends_with("00001: Job expired!\nremaining jobs were killed"));
    }
}
