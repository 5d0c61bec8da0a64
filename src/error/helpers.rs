use super::{ErrorCode, ParmapError};

/// Extension trait for convenient error conversion
pub trait ErrorExt<T> {
    /// Convert to a storage ParmapError carrying the original as source
    fn to_storage_error(self, message: impl Into<String>) -> Result<T, ParmapError>;
}

impl<T, E> ErrorExt<T> for Result<T, E>
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn to_storage_error(self, message: impl Into<String>) -> Result<T, ParmapError> {
        self.map_err(|e| ParmapError::storage(message).with_source(e))
    }
}

/// Helper functions for common error scenarios
pub mod common {
    use super::*;

    /// Create a not found error for configuration
    pub fn config_not_found(path: impl AsRef<std::path::Path>) -> ParmapError {
        ParmapError::config_with_code(
            ErrorCode::CONFIG_NOT_FOUND,
            format!("Configuration file not found: {}", path.as_ref().display()),
        )
    }

    /// Create the error raised for a level that was never registered
    pub fn unregistered_level(level: &str, registered: &[String]) -> ParmapError {
        let choices = if registered.is_empty() {
            "no levels are registered".to_string()
        } else {
            format!("registered levels: {}", registered.join(", "))
        };
        ParmapError::config_with_code(
            ErrorCode::CONFIG_UNREGISTERED_LEVEL,
            format!("Level '{}' is not registered ({})", level, choices),
        )
    }

    /// Create a command not found error
    pub fn command_not_found(command: &str) -> ParmapError {
        ParmapError::execution_with_code(
            ErrorCode::EXEC_COMMAND_NOT_FOUND,
            format!("Command '{}' not found", command),
            Some(command.to_string()),
        )
    }

    /// Create the error for input vectors of unequal length
    pub fn length_mismatch(expected: usize, column: usize, actual: usize) -> ParmapError {
        ParmapError::validation_with_code(
            ErrorCode::VALIDATION_LENGTH_MISMATCH,
            format!(
                "Input vector {} has {} elements, expected {}",
                column + 1,
                actual,
                expected
            ),
            Some("inputs".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_ext_wraps_source() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk gone",
        ));
        let err = result.to_storage_error("Registry write failed").unwrap_err();

        assert_eq!(err.code(), ErrorCode::STORAGE_GENERIC);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_unregistered_level_lists_choices() {
        let err = common::unregistered_level("tune.inner", &["tune.outer".to_string()]);
        assert!(err.to_string().contains("tune.outer"));
        assert!(err.is_configuration());
    }
}
