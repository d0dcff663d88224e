//! Kernel error types

use crate::state_machine::SessionState;
use std::time::Duration;

/// Errors raised while building or executing a pipeline
///
/// Step failures are not pipeline errors: they are recorded in the
/// [`StepReport`](crate::pipeline::StepReport).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Two steps share a name
    #[error("duplicate step '{0}'")]
    DuplicateStep(String),

    /// A step depends on a step that was never declared
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency {
        /// Declaring step
        step: String,
        /// Missing dependency
        dependency: String,
    },

    /// A step depends on itself
    #[error("step '{0}' depends on itself")]
    SelfDependency(String),

    /// Dependencies form a cycle
    #[error("dependency cycle detected in pipeline '{0}'")]
    CycleDetected(String),

    /// A step asked for the output of a step it does not depend on
    #[error("step output '{0}' is not available to this step")]
    MissingInput(String),

    /// A dependency's output has a different type than requested
    #[error("step output '{step}' is not a {expected}")]
    TypeMismatch {
        /// Producing step
        step: String,
        /// Requested type
        expected: &'static str,
    },
}

/// A step exceeded its time budget
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("step '{step}' timed out after {}ms", .after.as_millis())]
pub struct StepTimedOut {
    /// Step name
    pub step: String,
    /// Budget that elapsed
    pub after: Duration,
}

/// Session state machine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// Transition not permitted from the current state
    #[error("illegal session transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current state
        from: SessionState,
        /// Requested state
        to: SessionState,
    },
}
