use thiserror::Error;
use uuid::Uuid;

/// Pipeline and barrier errors with comprehensive error handling
#[derive(Error, Debug, Clone)]
pub enum ConvoyError {
    // Barrier lifecycle errors
    #[error("Barrier already invoked: {barrier_id}")]
    AlreadyInvoked { barrier_id: Uuid },

    #[error("Barrier registered twice with the same controller: {barrier_id}")]
    DuplicateRegistration { barrier_id: Uuid },

    #[error("Barrier never registered with this controller: {barrier_id}")]
    UnknownBarrier { barrier_id: Uuid },

    #[error("Barrier arrived twice: {barrier_id}")]
    DoubleBlock { barrier_id: Uuid },

    // Capacity errors
    #[error("Capacity exceeded: registering would put {registered} barriers over capacity {capacity}")]
    CapacityExceeded { registered: usize, capacity: usize },

    #[error("Requested capacity {requested} is below the {registered} barriers already registered")]
    CapacityBelowRegistered { requested: usize, registered: usize },

    // Aggregation errors
    #[error("Aggregate action returned {actual} results for {expected} inputs")]
    BadAggregatorOutput {
        controller_id: Uuid,
        expected: usize,
        actual: usize,
    },

    #[error("Lift action failed in controller {controller_id}: {reason}")]
    LiftActionFailed { controller_id: Uuid, reason: String },

    // Orchestration errors
    #[error("Step '{step}' failed after {attempts} attempts: {reason}")]
    StepFailed {
        step: String,
        attempts: u32,
        reason: String,
    },

    // Repository errors
    #[error("Job already exists: {job_id}")]
    DuplicateId { job_id: Uuid },

    #[error("Repository is closed")]
    RepositoryClosed,

    // Internal errors
    #[error("Internal invariant violated: {message}")]
    InternalInvariant { message: String },
}

impl ConvoyError {
    /// Create an internal invariant error
    pub fn invariant<S: Into<String>>(message: S) -> Self {
        Self::InternalInvariant {
            message: message.into(),
        }
    }

    /// The controller a failed lift action originated from, if any.
    ///
    /// The orchestrator uses this to skip the originating controller when
    /// fanning a step failure out to the other counted controllers.
    pub fn origin_controller(&self) -> Option<Uuid> {
        match self {
            Self::LiftActionFailed { controller_id, .. }
            | Self::BadAggregatorOutput { controller_id, .. } => Some(*controller_id),
            _ => None,
        }
    }

    /// Whether the error is a misuse of the API rather than a runtime failure
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInvoked { .. }
                | Self::DuplicateRegistration { .. }
                | Self::UnknownBarrier { .. }
                | Self::DoubleBlock { .. }
                | Self::CapacityExceeded { .. }
                | Self::CapacityBelowRegistered { .. }
        )
    }
}

/// Result type alias for convoy operations
pub type Result<T> = std::result::Result<T, ConvoyError>;
