use crate::error::{ErrorCode, ParmapError};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Process timed out after {0:?}")]
    Timeout(Duration),

    #[error("Process exited with code {0}")]
    ExitCode(i32),

    #[error("Process terminated by signal {0}")]
    Signal(i32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No async runtime available to run '{0}'")]
    NoRuntime(String),

    #[error("Mock expectation not met: {0}")]
    MockExpectationNotMet(String),
}

impl From<ProcessError> for ParmapError {
    fn from(err: ProcessError) -> Self {
        let (code, command, exit_code) = match &err {
            ProcessError::CommandNotFound(cmd) => {
                (ErrorCode::EXEC_COMMAND_NOT_FOUND, Some(cmd.clone()), None)
            }
            ProcessError::Timeout(_) => (ErrorCode::EXEC_TIMEOUT, None, None),
            ProcessError::ExitCode(code) => (ErrorCode::EXEC_SUBPROCESS_FAILED, None, Some(*code)),
            ProcessError::Signal(sig) => (ErrorCode::EXEC_SIGNAL_RECEIVED, None, Some(*sig)),
            ProcessError::Io(_) => (ErrorCode::EXEC_SPAWN_FAILED, None, None),
            ProcessError::NoRuntime(cmd) => (ErrorCode::EXEC_INTERRUPTED, Some(cmd.clone()), None),
            ProcessError::MockExpectationNotMet(_) => (ErrorCode::EXEC_GENERIC, None, None),
        };

        let mut error = ParmapError::execution_with_code(code, err.to_string(), command);
        if let ParmapError::Execution {
            exit_code: ex_code, ..
        } = &mut error
        {
            *ex_code = exit_code;
        }
        error.with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_keeps_exit_code() {
        let err: ParmapError = ProcessError::ExitCode(3).into();
        assert_eq!(err.code(), ErrorCode::EXEC_SUBPROCESS_FAILED);
        match err {
            ParmapError::Execution { exit_code, .. } => assert_eq!(exit_code, Some(3)),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_command_not_found_code() {
        let err: ParmapError = ProcessError::CommandNotFound("nope".into()).into();
        assert_eq!(err.code(), ErrorCode::EXEC_COMMAND_NOT_FOUND);
        assert_eq!(err.exit_code(), 5);
    }
}
