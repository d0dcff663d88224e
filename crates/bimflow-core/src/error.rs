//! Error type for bimflow flows
//!
//! Every failure inside a flow ends up attached to exactly one step of the
//! flow's report. Callers use [`FlowError::is_retryable`] and
//! [`FlowError::is_user_fatal`] to decide between retrying and giving up.

use crate::config::ConfigError;
use bimflow_kernel::{PipelineError, StepTimedOut};
use bimflow_model::ModelError;
use bimflow_worker::{JobId, LaunchError, SessionError, StagingError};
use std::path::PathBuf;

/// Main flow error type
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Original model could not be obtained
    #[error("model source {origin} unavailable: {source}")]
    Source {
        /// Where the model was fetched from
        origin: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Job directory does not exist
    #[error("unknown job {0}")]
    UnknownJob(JobId),

    /// Staging failure
    #[error("staging error: {0}")]
    Staging(#[from] StagingError),

    /// Worker failure
    #[error("worker error: {0}")]
    Launch(#[from] LaunchError),

    /// Engine session failure
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Model failed to parse, validate or edit
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Step wiring or input error
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Step exceeded its time budget
    #[error(transparent)]
    StepTimeout(#[from] StepTimedOut),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Report or result document could not be encoded
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored report is unreadable
    #[error("unreadable report {path}: {message}")]
    Report {
        /// Report file
        path: PathBuf,
        /// Detail
        message: String,
    },
}

impl FlowError {
    /// Whether running the flow again may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Launch(LaunchError::Timeout { .. }) | Self::StepTimeout(_) => true,
            Self::Session(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether the whole flow must stop until the user intervenes
    #[must_use]
    pub fn is_user_fatal(&self) -> bool {
        matches!(
            self,
            Self::Source { .. } | Self::UnknownJob(_) | Self::Model(_) | Self::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn transient_failures_are_retryable() {
        let timeout = FlowError::from(LaunchError::Timeout {
            program: "pyrevit".into(),
            after: Duration::from_secs(900),
        });
        assert!(timeout.is_retryable());
        assert!(!timeout.is_user_fatal());

        let connect = FlowError::from(SessionError::ConnectFailure {
            attempts: 5,
            last_error: "not ready".into(),
        });
        assert!(connect.is_retryable());
    }

    #[test]
    fn missing_model_is_fatal() {
        let err = FlowError::Source {
            origin: "/models/tower.rvt".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.is_user_fatal());
        assert!(!err.is_retryable());
        assert!(FlowError::from(ModelError::EmptyExport).is_user_fatal());
    }
}
