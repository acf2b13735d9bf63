//! Legal job status transitions.
//!
//! The queue owns exactly three paths:
//!
//! ```text
//! pending -> processing -> completed
//! pending -> processing -> failed
//! pending -> cancelled
//! ```
//!
//! Repositories call [`validate_transition`] before any status write so an
//! illegal move is a programming error surfaced at the call site, not a
//! silent row update.

use crate::error::CoreError;
use crate::status::JobStatus;

/// Validate a job status transition, returning a descriptive error when the
/// move is not part of the state machine.
pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), CoreError> {
    use JobStatus::*;

    let legal = matches!(
        (from, to),
        (Pending, Processing) | (Pending, Cancelled) | (Processing, Completed) | (Processing, Failed)
    );

    if legal {
        Ok(())
    } else {
        Err(CoreError::Conflict(format!(
            "illegal job transition {from} -> {to}"
        )))
    }
}
