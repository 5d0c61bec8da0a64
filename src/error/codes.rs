/// Error code registry for parmap
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 3000-3999: Storage errors
/// - 4000-4999: Execution errors
/// - 5000-5999: Mapping (abort) errors
/// - 6000-6999: Backend errors
/// - 7000-7999: Validation errors
/// - 9000-9999: Other errors
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_INVALID_TOML: u16 = 1002;
    pub const CONFIG_INVALID_JSON: u16 = 1003;
    pub const CONFIG_INVALID_VALUE: u16 = 1005;
    pub const CONFIG_UNKNOWN_MODE: u16 = 1010;
    pub const CONFIG_UNREGISTERED_LEVEL: u16 = 1011;
    pub const CONFIG_INVALID_CPUS: u16 = 1012;

    // Storage errors (3000-3999)
    pub const STORAGE_GENERIC: u16 = 3000;
    pub const STORAGE_IO_ERROR: u16 = 3001;
    pub const STORAGE_PERMISSION_DENIED: u16 = 3002;
    pub const STORAGE_NOT_FOUND: u16 = 3004;
    pub const STORAGE_ALREADY_EXISTS: u16 = 3005;
    pub const STORAGE_SERIALIZATION_ERROR: u16 = 3011;

    // Execution errors (4000-4999)
    pub const EXEC_GENERIC: u16 = 4000;
    pub const EXEC_COMMAND_NOT_FOUND: u16 = 4001;
    pub const EXEC_TIMEOUT: u16 = 4002;
    pub const EXEC_SUBPROCESS_FAILED: u16 = 4003;
    pub const EXEC_SIGNAL_RECEIVED: u16 = 4005;
    pub const EXEC_INTERRUPTED: u16 = 4006;
    pub const EXEC_SPAWN_FAILED: u16 = 4007;
    pub const EXEC_OUTPUT_ERROR: u16 = 4008;

    // Mapping errors (5000-5999)
    pub const MAP_ABORTED: u16 = 5000;
    pub const MAP_JOBS_KILLED: u16 = 5001;

    // Backend errors (6000-6999)
    pub const BACKEND_GENERIC: u16 = 6000;
    pub const BACKEND_WORKER_LOST: u16 = 6001;
    pub const BACKEND_SUBMIT_FAILED: u16 = 6002;
    pub const BACKEND_RESULT_MISSING: u16 = 6003;

    // Validation errors (7000-7999)
    pub const VALIDATION_GENERIC: u16 = 7000;
    pub const VALIDATION_INVALID_INPUT: u16 = 7001;
    pub const VALIDATION_INVALID_DATA: u16 = 7002;
    pub const VALIDATION_LENGTH_MISMATCH: u16 = 7003;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        ErrorCode::CONFIG_GENERIC => "General configuration error",
        ErrorCode::CONFIG_NOT_FOUND => "Configuration file not found",
        ErrorCode::CONFIG_INVALID_TOML => "Invalid TOML syntax in configuration",
        ErrorCode::CONFIG_INVALID_JSON => "Invalid JSON syntax",
        ErrorCode::CONFIG_INVALID_VALUE => "Invalid configuration value",
        ErrorCode::CONFIG_UNKNOWN_MODE => "Unknown parallelization mode",
        ErrorCode::CONFIG_UNREGISTERED_LEVEL => "Parallelization level is not registered",
        ErrorCode::CONFIG_INVALID_CPUS => "Invalid number of cpus",

        ErrorCode::STORAGE_GENERIC => "General storage error",
        ErrorCode::STORAGE_IO_ERROR => "I/O error during storage operation",
        ErrorCode::STORAGE_PERMISSION_DENIED => "Permission denied for storage operation",
        ErrorCode::STORAGE_NOT_FOUND => "Storage location not found",
        ErrorCode::STORAGE_ALREADY_EXISTS => "Storage location already exists",
        ErrorCode::STORAGE_SERIALIZATION_ERROR => "Failed to serialize data",

        ErrorCode::EXEC_GENERIC => "General execution error",
        ErrorCode::EXEC_COMMAND_NOT_FOUND => "Command not found",
        ErrorCode::EXEC_TIMEOUT => "Command execution timed out",
        ErrorCode::EXEC_SUBPROCESS_FAILED => "Subprocess failed",
        ErrorCode::EXEC_SIGNAL_RECEIVED => "Process received signal",
        ErrorCode::EXEC_INTERRUPTED => "Execution interrupted",
        ErrorCode::EXEC_SPAWN_FAILED => "Failed to spawn process",
        ErrorCode::EXEC_OUTPUT_ERROR => "Failed to read process output",

        ErrorCode::MAP_ABORTED => "Mapping aborted because worker jobs failed",
        ErrorCode::MAP_JOBS_KILLED => "Mapping aborted and remaining jobs were killed",

        ErrorCode::BACKEND_GENERIC => "General backend error",
        ErrorCode::BACKEND_WORKER_LOST => "A backend worker disappeared",
        ErrorCode::BACKEND_SUBMIT_FAILED => "Job submission failed",
        ErrorCode::BACKEND_RESULT_MISSING => "Job result could not be retrieved",

        ErrorCode::VALIDATION_GENERIC => "General validation error",
        ErrorCode::VALIDATION_INVALID_INPUT => "Invalid input provided",
        ErrorCode::VALIDATION_INVALID_DATA => "Invalid data format",
        ErrorCode::VALIDATION_LENGTH_MISMATCH => "Input vectors differ in length",

        ErrorCode::OTHER_GENERIC => "An error occurred",
        _ => "Unknown error code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_descriptions() {
        assert_eq!(
            describe_error_code(ErrorCode::CONFIG_UNREGISTERED_LEVEL),
            "Parallelization level is not registered"
        );
        assert_eq!(
            describe_error_code(ErrorCode::MAP_ABORTED),
            "Mapping aborted because worker jobs failed"
        );
        assert_eq!(describe_error_code(9999), "Unknown error code");
    }
}
