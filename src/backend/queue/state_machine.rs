//! Pure job lifecycle state machine
//!
//! ```text
//! Submitted ──Start──▶ Running ──Finish──▶ Done
//!     │                   │──Fail────▶ Error
//!     │                   │──Expire──▶ Expired
//!     └──Kill / Expire────┴──Kill────▶ Killed
//! ```
//!
//! Terminal states (`Done`, `Error`, `Expired`, `Killed`) accept no
//! transitions.

use super::JobState;
use std::fmt;

/// Event reported for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTransition {
    Start,
    Finish,
    Fail,
    Expire,
    Kill,
}

impl fmt::Display for JobTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("Invalid transition from {from} with {transition}")]
    InvalidTransition {
        from: JobState,
        transition: JobTransition,
    },
}

/// Apply `transition` to `state`
pub fn apply_transition(state: JobState, transition: JobTransition) -> Result<JobState, StateError> {
    use JobState::*;
    use JobTransition::*;

    match (state, transition) {
        (Submitted, Start) => Ok(Running),
        (Running, Finish) => Ok(Done),
        (Running, Fail) => Ok(Error),
        // a job lost before or during execution
        (Submitted | Running, Expire) => Ok(Expired),
        (Submitted | Running, Kill) => Ok(Killed),
        (from, transition) => Err(StateError::InvalidTransition { from, transition }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = apply_transition(JobState::Submitted, JobTransition::Start).unwrap();
        assert_eq!(state, JobState::Running);
        let state = apply_transition(state, JobTransition::Finish).unwrap();
        assert_eq!(state, JobState::Done);
    }

    #[test]
    fn test_kill_and_expire_from_pending() {
        assert_eq!(
            apply_transition(JobState::Submitted, JobTransition::Kill).unwrap(),
            JobState::Killed
        );
        assert_eq!(
            apply_transition(JobState::Running, JobTransition::Expire).unwrap(),
            JobState::Expired
        );
    }

    #[test]
    fn test_cannot_finish_without_starting() {
        let err = apply_transition(JobState::Submitted, JobTransition::Finish).unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidTransition {
                from: JobState::Submitted,
                transition: JobTransition::Finish
            }
        );
    }

    #[test]
    fn test_terminal_states_are_final() {
        for state in [JobState::Done, JobState::Error, JobState::Expired, JobState::Killed] {
            for transition in [
                JobTransition::Start,
                JobTransition::Finish,
                JobTransition::Fail,
                JobTransition::Expire,
                JobTransition::Kill,
            ] {
                assert!(apply_transition(state, transition).is_err());
            }
        }
    }
}
