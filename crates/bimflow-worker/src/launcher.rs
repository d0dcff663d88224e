//! Worker launch and completion watching
//!
//! A worker is done when its output shows up in the job directory, not when
//! it exits: host applications commonly linger after the script finishes,
//! and a clean exit says nothing about whether output was written.

use crate::descriptor::JobDescriptor;
use crate::error::{LaunchError, StagingError};
use crate::process::{CapturedOutput, ProcessHandle, WorkerCommand};
use crate::staging::{ArtifactInfo, ArtifactPattern, JobId, StagingStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Polling and timeout settings for worker runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Interval between output checks, in milliseconds
    pub poll_interval_ms: u64,
    /// Overall budget per worker run, in milliseconds
    pub timeout_ms: u64,
    /// Time a worker is given to exit after its output appeared
    pub exit_grace_ms: u64,
    /// File the worker writes last to signal completion
    pub completion_marker: Option<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            timeout_ms: 15 * 60 * 1_000,
            exit_grace_ms: 10_000,
            completion_marker: None,
        }
    }
}

impl LauncherConfig {
    /// Set poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_ms(interval);
        self
    }

    /// Set overall timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = duration_ms(timeout);
        self
    }

    /// Set exit grace period
    #[inline]
    #[must_use]
    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace_ms = duration_ms(grace);
        self
    }

    /// Require a completion marker
    #[inline]
    #[must_use]
    pub fn with_completion_marker(mut self, name: impl Into<String>) -> Self {
        self.completion_marker = Some(name.into());
        self
    }

    /// Poll interval
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Overall timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Exit grace period
    #[must_use]
    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }
}

/// File system timestamps come from a coarser clock than `SystemTime::now`
const WATERMARK_SLACK: Duration = Duration::from_secs(1);

enum Completion {
    Pending,
    Done(ArtifactInfo),
    MarkerOnly,
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// A worker invocation
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    /// Job whose directory the worker writes into
    pub job: JobId,
    /// Command to run
    pub command: &'a WorkerCommand,
    /// Arguments after placeholder substitution
    pub args: Vec<String>,
    /// Environment contract
    pub descriptor: &'a JobDescriptor,
    /// Output the worker is expected to produce
    pub expect: ArtifactPattern,
}

/// Successful worker run
#[derive(Debug, Clone)]
pub struct LaunchOutcome {
    /// Artifact the worker produced
    pub artifact: ArtifactInfo,
    /// Exit code, `None` if still running when the grace period ended or
    /// killed by a signal
    pub exit_code: Option<i32>,
    /// Captured output
    pub output: CapturedOutput,
    /// Wall time from spawn to completion
    pub elapsed: Duration,
}

/// Runs external workers against the staging store
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: LauncherConfig,
    store: Arc<StagingStore>,
}

impl ProcessLauncher {
    /// Create a launcher
    #[must_use]
    pub fn new(config: LauncherConfig, store: Arc<StagingStore>) -> Self {
        Self { config, store }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Start the worker and wait for its output
    ///
    /// Only artifacts modified after the run started (less one second of
    /// clock slack) are considered, so a file left by an earlier run is not
    /// mistaken for this run's output.
    pub async fn run(&self, request: LaunchRequest<'_>) -> Result<LaunchOutcome, LaunchError> {
        let job = request.job;
        let dir = self.store.job_dir(&job);
        let limit = self.config.timeout();

        let expect = match &self.config.completion_marker {
            Some(marker) => request.expect.clone().excluding(&[marker.as_str()]),
            None => request.expect.clone(),
        };
        self.store.log_snapshot(&job, &expect, "before").await;
        let watermark = SystemTime::now()
            .checked_sub(WATERMARK_SLACK)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let started = Instant::now();
        let mut handle =
            ProcessHandle::spawn(request.command, &request.args, Some(request.descriptor), &dir)?;
        info!(
            job = %job,
            program = %handle.program(),
            role = ?request.descriptor.role(),
            expect = %expect,
            timeout_ms = self.config.timeout_ms,
            "worker started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let artifact = match self.completed(&job, &expect, watermark).await? {
                Completion::Done(artifact) => Some(artifact),
                Completion::MarkerOnly => {
                    handle.terminate().await;
                    return Err(LaunchError::ArtifactNotFound {
                        program: handle.program().to_string(),
                        pattern: expect.to_string(),
                        dir,
                    });
                }
                Completion::Pending => None,
            };
            if let Some(artifact) = artifact {
                let status = handle.wait_for_exit(self.config.exit_grace()).await;
                if status.is_none() {
                    warn!(job = %job, program = %handle.program(), "worker still running after output appeared");
                    handle.terminate().await;
                }
                let output = handle.collect_output().await;
                self.store.log_snapshot(&job, &expect, "after").await;
                info!(job = %job, artifact = %artifact.name, elapsed = ?started.elapsed(), "worker output discovered");
                return Ok(LaunchOutcome {
                    artifact,
                    exit_code: status.and_then(|s| s.code()),
                    output,
                    elapsed: started.elapsed(),
                });
            }

            if let Some(status) = handle.try_exit()? {
                let output = handle.collect_output().await;
                if !status.success() {
                    return Err(handle.failure(status, output));
                }
                self.store.log_snapshot(&job, &expect, "after").await;
                // the file may have landed between the last check and exit
                return match self.completed(&job, &expect, watermark).await? {
                    Completion::Done(artifact) => Ok(LaunchOutcome {
                        artifact,
                        exit_code: status.code(),
                        output,
                        elapsed: started.elapsed(),
                    }),
                    Completion::Pending | Completion::MarkerOnly => {
                        Err(LaunchError::ArtifactNotFound {
                            program: handle.program().to_string(),
                            pattern: expect.to_string(),
                            dir,
                        })
                    }
                };
            }

            if started.elapsed() >= limit {
                handle.terminate().await;
                self.store.log_snapshot(&job, &expect, "timeout").await;
                return Err(LaunchError::Timeout {
                    program: handle.program().to_string(),
                    after: limit,
                });
            }
            debug!(job = %job, elapsed = ?started.elapsed(), "worker output not yet present");
        }
    }

    async fn completed(
        &self,
        job: &JobId,
        expect: &ArtifactPattern,
        watermark: SystemTime,
    ) -> Result<Completion, LaunchError> {
        let marked = match &self.config.completion_marker {
            Some(marker) => {
                let marker = ArtifactPattern::new(marker)?;
                match self.store.discover_newest_since(job, &marker, watermark).await {
                    Ok(_) => true,
                    Err(StagingError::ArtifactNotFound { .. }) => return Ok(Completion::Pending),
                    Err(e) => return Err(e.into()),
                }
            }
            None => false,
        };
        match self.store.discover_newest_since(job, expect, watermark).await {
            Ok(found) => Ok(Completion::Done(found)),
            Err(StagingError::ArtifactNotFound { .. }) if marked => Ok(Completion::MarkerOnly),
            Err(StagingError::ArtifactNotFound { .. }) => Ok(Completion::Pending),
            Err(e) => Err(e.into()),
        }
    }
}
