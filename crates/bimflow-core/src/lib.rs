//! bimflow Core
//!
//! Orchestrates BIM model round trips through external workers:
//!
//! - **extract**: stage the original model, run the export script, normalize
//!   its output into `output.json`
//! - **modify**: apply section overrides and write `input.json`
//! - **analyze**: drive the structural analysis engine and check deflections
//! - **update**: write `input.json` back into the model as `updated_model.<ext>`
//!
//! Every flow returns a [`FlowRun`] whose report records each step's outcome.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod source;

pub use config::{ConfigError, OrchestratorConfig};
pub use error::FlowError;
pub use orchestrator::{ConnectorFactory, FlowRun, Orchestrator, StagedModel};
pub use source::{BytesSource, FetchedModel, FileSource, ModelSource};
