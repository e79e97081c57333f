//! Error types for the scheduler.

use thiserror::Error;

/// Result type alias for scheduling operations.
pub type SchedulingResult<T> = Result<T, SchedulingError>;

/// Errors surfaced by the scheduler.
///
/// Placement failures on a single pod or node are control flow, not
/// errors: the pod is tried elsewhere or deferred with an event. Only
/// pass-fatal conditions appear here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulingError {
    /// No provisioners are configured at all; the pass cannot proceed.
    #[error("no provisioners configured")]
    NoProvisioners,

    /// The candidate's requirements conflict on a key.
    #[error("incompatible requirement on key {0}")]
    IncompatibleRequirement(String),

    /// No topology domain admits the pod for this key.
    #[error("no admissible topology domain for {key}")]
    NoAdmissibleDomain { key: String },

    /// No instance type can host the workload under the requirements.
    #[error("no instance type satisfies the node")]
    NoInstanceTypes,
}

impl From<gantry_core::CoreError> for SchedulingError {
    fn from(err: gantry_core::CoreError) -> Self {
        match err {
            gantry_core::CoreError::IncompatibleRequirement(key) => {
                SchedulingError::IncompatibleRequirement(key)
            }
            other => SchedulingError::IncompatibleRequirement(other.to_string()),
        }
    }
}
