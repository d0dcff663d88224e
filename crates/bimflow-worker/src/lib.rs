//! bimflow Worker
//!
//! Everything that touches the outside world on behalf of a job:
//!
//! - [`staging`]: per-job directories and artifact discovery
//! - [`descriptor`]: the environment contract read by worker scripts
//! - [`launcher`]: running a worker until its output appears
//! - [`session`]: the analysis engine session lifecycle

pub mod descriptor;
pub mod error;
pub mod launcher;
pub mod process;
pub mod session;
pub mod staging;

pub use descriptor::{JobDescriptor, WorkerRole};
pub use error::{EngineError, LaunchError, SessionError, StagingError};
pub use launcher::{LaunchOutcome, LaunchRequest, LauncherConfig, ProcessLauncher};
pub use process::{CapturedOutput, ProcessHandle, WorkerCommand};
pub use session::{
    BridgeConnector, EngineConnector, EngineLink, InstallationLease, SessionConfig,
    SessionController,
};
pub use staging::{safe_file_name, ArtifactInfo, ArtifactPattern, JobId, StagingStore};
