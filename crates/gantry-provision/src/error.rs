//! Error types for the provisioning loop.

use thiserror::Error;

/// Result type alias for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors that abort a pass (transient; the next trigger retries) or a
/// single node launch (siblings proceed).
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// No provisioners are configured; fatal for the pass.
    #[error("no provisioners found")]
    NoProvisioners,

    #[error("cluster store: {0}")]
    Store(#[from] gantry_state::StateError),

    #[error("cloud provider: {0}")]
    Cloud(#[from] gantry_cloud::CloudError),

    #[error("scheduling: {0}")]
    Scheduling(#[from] gantry_scheduling::SchedulingError),

    /// A provisioner disappeared between solve and launch.
    #[error("provisioner {0} no longer exists")]
    ProvisionerNotFound(String),

    /// A pod failed precondition checks; skipped for the pass, never
    /// propagated beyond it.
    #[error("validation: {0}")]
    Validation(String),
}
