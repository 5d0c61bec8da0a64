//! Fatal error reporting for the binary

use crate::error::ParmapError;
use tracing::error;

/// Exit status for errors that are not a [`ParmapError`]
const GENERAL_ERROR: i32 = 1;

/// Print `error` and exit with its category's status code.
///
/// With `verbose >= 1` the full error chain is printed as well.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {}", error);
    std::process::exit(report(&error, verbose))
}

fn report(error: &anyhow::Error, verbose: u8) -> i32 {
    if let Some(parmap_err) = error.downcast_ref::<ParmapError>() {
        eprintln!("{}", parmap_err.user_message());
        if verbose >= 1 {
            eprintln!("\nContext Chain:\n{}", parmap_err.developer_message());
        }
        return parmap_err.exit_code();
    }

    eprintln!("Error: {error}");
    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }
    GENERAL_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnitFailure;

    #[test]
    fn test_exit_code_follows_category() {
        let abort = anyhow::Error::new(ParmapError::abort(vec![UnitFailure::new(0, "bad")]));
        assert_eq!(report(&abort, 0), 6);

        let config = anyhow::Error::new(ParmapError::config("bad level"));
        assert_eq!(report(&config, 1), 2);

        assert_eq!(report(&anyhow::anyhow!("plain"), 0), GENERAL_ERROR);
    }
}
