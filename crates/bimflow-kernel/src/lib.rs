//! bimflow Kernel
//!
//! Orchestration primitives shared by every workflow stage:
//!
//! - [`pipeline`]: named steps with declared dependencies, executed in a
//!   deterministic order with skip propagation on failure
//! - [`state_machine`]: the legal lifecycle of an engine session

pub mod error;
pub mod pipeline;
pub mod state_machine;

pub use error::{PipelineError, StateMachineError, StepTimedOut};
pub use pipeline::{
    Pipeline, PipelineBuilder, ReportSummary, StepInputs, StepOutcome, StepRecord, StepReport,
    StepSpec, StepSummary, StepValue,
};
pub use state_machine::SessionState;
