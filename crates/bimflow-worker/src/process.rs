//! External process ownership

use crate::descriptor::JobDescriptor;
use crate::error::LaunchError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Program and arguments for an external worker
///
/// Arguments may contain `{name}` placeholders, filled from the variables
/// passed to [`WorkerCommand::render`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    /// Executable
    pub program: String,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Command with no arguments
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument
    #[inline]
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Arguments with placeholders substituted
    #[must_use]
    pub fn render(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (name, value)| {
                    acc.replace(&format!("{{{name}}}"), value)
                })
            })
            .collect()
    }
}

/// Output captured from a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
}

/// Exclusive owner of a spawned process
///
/// Dropping the handle kills the process if it is still running.
#[derive(Debug)]
pub struct ProcessHandle {
    program: String,
    child: Child,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

impl ProcessHandle {
    /// Start `command` in `cwd` with the descriptor's entries in its environment
    pub fn spawn(
        command: &WorkerCommand,
        args: &[String],
        descriptor: Option<&JobDescriptor>,
        cwd: &Path,
    ) -> Result<Self, LaunchError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(descriptor) = descriptor {
            for (key, value) in descriptor.iter() {
                cmd.env(key, value);
            }
        }

        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: command.program.clone(),
            source,
        })?;
        debug!(program = %command.program, pid = child.id(), "process spawned");

        let stdout = child.stdout.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                buf
            })
        });
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                buf
            })
        });

        Ok(Self {
            program: command.program.clone(),
            child,
            stdout,
            stderr,
        })
    }

    /// Program name
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// OS process id, `None` once reaped
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Exit status if the process has finished
    pub fn try_exit(&mut self) -> Result<Option<ExitStatus>, LaunchError> {
        self.child.try_wait().map_err(|source| LaunchError::Wait {
            program: self.program.clone(),
            source,
        })
    }

    /// Wait up to `grace` for the process to exit on its own
    pub async fn wait_for_exit(&mut self, grace: Duration) -> Option<ExitStatus> {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!(program = %self.program, error = %e, "failed waiting for process");
                None
            }
            Err(_) => None,
        }
    }

    /// Kill the process and reap it
    pub async fn terminate(&mut self) {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }
        warn!(program = %self.program, pid = self.child.id(), "terminating process");
        if let Err(e) = self.child.kill().await {
            warn!(program = %self.program, error = %e, "failed to kill process");
        }
    }

    /// Drain captured output
    ///
    /// Call after the process has exited or been terminated; the pipes close
    /// when it does.
    pub async fn collect_output(&mut self) -> CapturedOutput {
        CapturedOutput {
            stdout: drain(self.stdout.take()).await,
            stderr: drain(self.stderr.take()).await,
        }
    }

    /// Wait for the process to finish within `limit`
    ///
    /// A non-zero exit becomes [`LaunchError::ProcessFailure`]; exceeding
    /// `limit` terminates the process and yields [`LaunchError::Timeout`].
    pub async fn finish(mut self, limit: Duration) -> Result<CapturedOutput, LaunchError> {
        let Some(status) = self.wait_for_exit(limit).await else {
            self.terminate().await;
            return Err(LaunchError::Timeout {
                program: self.program.clone(),
                after: limit,
            });
        };
        let output = self.collect_output().await;
        if status.success() {
            Ok(output)
        } else {
            Err(self.failure(status, output))
        }
    }

    pub(crate) fn failure(&self, status: ExitStatus, output: CapturedOutput) -> LaunchError {
        LaunchError::ProcessFailure {
            program: self.program.clone(),
            status: status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

async fn drain(task: Option<JoinHandle<Vec<u8>>>) -> String {
    // a pipe inherited by a grandchild can stay open; bound the wait
    match task {
        Some(task) => match tokio::time::timeout(Duration::from_secs(2), task).await {
            Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            _ => String::new(),
        },
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_fills_placeholders() {
        let cmd = WorkerCommand::new("pyrevit")
            .with_arg("run")
            .with_arg("export.py")
            .with_arg("{model}")
            .with_arg("--out={job_dir}");
        let args = cmd.render(&[("model", "/jobs/a/tower.rvt"), ("job_dir", "/jobs/a")]);
        assert_eq!(args, vec!["run", "export.py", "/jobs/a/tower.rvt", "--out=/jobs/a"]);
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        let cmd = WorkerCommand::new("x").with_arg("{other}");
        assert_eq!(cmd.render(&[("model", "m")]), vec!["{other}"]);
    }
}
