//! Worker-layer error types

use bimflow_kernel::StateMachineError;
use bimflow_model::ModelError;
use std::path::PathBuf;
use std::time::Duration;

/// Errors raised by the staging store
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    /// Local disk I/O failed
    #[error("staging io error at {path}: {source}")]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// No file matched
    #[error("no artifact matching '{pattern}' in {dir}")]
    ArtifactNotFound {
        /// Pattern or exact name searched
        pattern: String,
        /// Directory searched
        dir: PathBuf,
    },

    /// Input artifacts cannot be replaced once staged
    #[error("artifact already staged: {0}")]
    AlreadyStaged(PathBuf),

    /// Artifact name is not a plain file name
    #[error("invalid artifact name '{0}'")]
    InvalidName(String),

    /// Pattern could not be compiled
    #[error("invalid artifact pattern '{pattern}': {message}")]
    InvalidPattern {
        /// Glob pattern
        pattern: String,
        /// Compiler message
        message: String,
    },
}

impl StagingError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while running an external worker process
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Process could not be started
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Process exceeded its time budget and was terminated
    #[error("worker '{program}' timed out after {}ms", .after.as_millis())]
    Timeout {
        /// Program
        program: String,
        /// Budget that elapsed
        after: Duration,
    },

    /// Process signaled failure
    #[error("worker '{program}' failed with {}: {}", describe_status(*.status), tail(.stderr))]
    ProcessFailure {
        /// Program
        program: String,
        /// Exit code, `None` if killed by a signal
        status: Option<i32>,
        /// Captured standard output
        stdout: String,
        /// Captured standard error
        stderr: String,
    },

    /// Process exited cleanly without producing the expected artifact
    #[error("worker '{program}' exited without producing '{pattern}' in {dir}")]
    ArtifactNotFound {
        /// Program
        program: String,
        /// Expected artifact pattern
        pattern: String,
        /// Directory searched
        dir: PathBuf,
    },

    /// Staging failure while watching for output
    #[error(transparent)]
    Staging(#[from] StagingError),

    /// Waiting on the process failed
    #[error("failed to observe worker '{program}': {source}")]
    Wait {
        /// Program
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

fn describe_status(status: Option<i32>) -> String {
    status.map_or_else(|| "signal".to_string(), |code| format!("exit code {code}"))
}

fn tail(text: &str) -> &str {
    const LIMIT: usize = 2048;
    let text = text.trim_end();
    if text.len() <= LIMIT {
        return text;
    }
    let mut start = text.len() - LIMIT;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Errors raised by the engine link
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Engine is not accepting an attach yet
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// An engine operation failed
    #[error("engine operation '{operation}' failed: {message}")]
    Operation {
        /// Operation name
        operation: String,
        /// Failure detail
        message: String,
    },

    /// Bridge process failure
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// Staging failure
    #[error(transparent)]
    Staging(#[from] StagingError),

    /// Engine returned an unreadable document
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Errors raised by the session controller
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Another session holds the engine installation
    #[error("engine installation {0} is already in use by another session")]
    Busy(PathBuf),

    /// Attach did not succeed within the retry budget
    #[error("could not attach to engine after {attempts} attempt(s): {last_error}")]
    ConnectFailure {
        /// Attempts made
        attempts: u32,
        /// Last attach error
        last_error: String,
    },

    /// Engine process exited while the session was open
    #[error("engine process exited unexpectedly ({})", describe_status(*.status))]
    EngineExited {
        /// Exit code, `None` if killed by a signal
        status: Option<i32>,
    },

    /// Analysis did not finish in time
    #[error("analysis still running after {}ms", .after.as_millis())]
    AnalysisTimeout {
        /// Budget that elapsed
        after: Duration,
    },

    /// Engine process could not be started
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// Engine operation failed
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Controller attempted an illegal lifecycle transition
    #[error(transparent)]
    State(#[from] StateMachineError),
}

impl SessionError {
    /// Whether a fresh session may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Busy(_) | Self::ConnectFailure { .. } | Self::EngineExited { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_failure_shows_stderr_tail() {
        let err = LaunchError::ProcessFailure {
            program: "pyrevit".into(),
            status: Some(3),
            stdout: String::new(),
            stderr: format!("{}license expired\n", "x".repeat(5000)),
        };
        let text = err.to_string();
        assert!(text.contains("exit code 3"));
        assert!(text.ends_with("license expired"));
        assert!(text.len() < 2200);
    }
}
