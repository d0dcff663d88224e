//! Engine session controller
//!
//! Owns the engine process, the attached link and the installation lease for
//! the length of one analysis. Every lifecycle change goes through
//! [`validate_transition`], and [`SessionController::close`] runs on every
//! exit path so no engine process outlives its session.

mod bridge;
mod engine;
mod lease;

pub use bridge::{BridgeConnector, ENGINE_RESULTS_PATTERN};
pub use engine::{EngineConnector, EngineLink};
pub use lease::InstallationLease;

use crate::error::{EngineError, SessionError};
use crate::launcher::duration_ms;
use crate::process::{ProcessHandle, WorkerCommand};
use bimflow_kernel::state_machine::validate_transition;
use bimflow_kernel::SessionState;
use bimflow_model::{AnalysisResults, AnalysisSettings, AnalyticalModel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Default engine installation
pub const DEFAULT_ENGINE: &str =
    r"C:\Program Files\Bentley\Engineering\STAAD.Pro 2024\STAAD\Bentley.Staad.exe";

/// Session timing and engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Installation the lease is taken on
    pub installation: PathBuf,
    /// Engine process to launch, `None` when the connector starts it
    pub engine: Option<WorkerCommand>,
    /// Wait after launch before the first attach, in milliseconds
    pub ready_delay_ms: u64,
    /// Attach attempts before giving up
    pub attach_attempts: u32,
    /// First retry delay, doubled per attempt
    pub attach_backoff_ms: u64,
    /// Retry delay cap
    pub attach_backoff_max_ms: u64,
    /// Interval between analysis status checks
    pub analysis_poll_ms: u64,
    /// Analysis budget
    pub analysis_timeout_ms: u64,
    /// Time the engine is given to exit after detaching
    pub exit_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            installation: PathBuf::from(DEFAULT_ENGINE),
            engine: Some(WorkerCommand::new(DEFAULT_ENGINE)),
            ready_delay_ms: 15_000,
            attach_attempts: 5,
            attach_backoff_ms: 1_000,
            attach_backoff_max_ms: 16_000,
            analysis_poll_ms: 2_000,
            analysis_timeout_ms: 30 * 60 * 1_000,
            exit_grace_ms: 5_000,
        }
    }
}

impl SessionConfig {
    /// Set installation and engine command together
    #[inline]
    #[must_use]
    pub fn with_engine(mut self, engine: WorkerCommand) -> Self {
        self.installation = PathBuf::from(&engine.program);
        self.engine = Some(engine);
        self
    }

    /// Leave process launch to the connector, leasing `installation`
    #[inline]
    #[must_use]
    pub fn without_engine(mut self, installation: impl Into<PathBuf>) -> Self {
        self.installation = installation.into();
        self.engine = None;
        self
    }

    /// Set ready delay
    #[inline]
    #[must_use]
    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay_ms = duration_ms(delay);
        self
    }

    /// Set attach retry budget
    #[inline]
    #[must_use]
    pub fn with_attach_retries(mut self, attempts: u32, backoff: Duration, max: Duration) -> Self {
        self.attach_attempts = attempts.max(1);
        self.attach_backoff_ms = duration_ms(backoff);
        self.attach_backoff_max_ms = duration_ms(max);
        self
    }

    /// Set analysis polling and budget
    #[inline]
    #[must_use]
    pub fn with_analysis_timeout(mut self, poll: Duration, timeout: Duration) -> Self {
        self.analysis_poll_ms = duration_ms(poll);
        self.analysis_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set exit grace period
    #[inline]
    #[must_use]
    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace_ms = duration_ms(grace);
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.attach_backoff_ms
                .saturating_mul(factor)
                .min(self.attach_backoff_max_ms),
        )
    }
}

/// Drives one engine session through its lifecycle
pub struct SessionController {
    config: SessionConfig,
    connector: Arc<dyn EngineConnector>,
    work_dir: PathBuf,
    state: SessionState,
    history: Vec<SessionState>,
    process: Option<ProcessHandle>,
    link: Option<Box<dyn EngineLink>>,
    lease: Option<InstallationLease>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("installation", &self.config.installation)
            .field("state", &self.state)
            .field("pid", &self.process.as_ref().and_then(ProcessHandle::id))
            .field("attached", &self.link.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Create a disconnected controller; the engine starts in `work_dir`
    #[must_use]
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn EngineConnector>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            connector,
            work_dir: work_dir.into(),
            state: SessionState::Disconnected,
            history: vec![SessionState::Disconnected],
            process: None,
            link: None,
            lease: None,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state entered so far, oldest first
    #[must_use]
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Working directory of the engine process
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Launch the engine and attach to it
    ///
    /// On failure the session is closed before the error is returned.
    pub async fn open(&mut self) -> Result<(), SessionError> {
        let result = self.open_inner().await;
        if result.is_err() {
            self.close().await;
        }
        result
    }

    async fn open_inner(&mut self) -> Result<(), SessionError> {
        self.lease = Some(InstallationLease::acquire(&self.config.installation)?);
        self.transition(SessionState::Launching)?;

        if let Some(engine) = &self.config.engine {
            let work_dir = self.work_dir.display().to_string();
            let args = engine.render(&[("job_dir", work_dir.as_str())]);
            let handle = ProcessHandle::spawn(engine, &args, None, &self.work_dir)?;
            info!(engine = %handle.program(), pid = handle.id(), "engine launched");
            self.process = Some(handle);
        }

        self.transition(SessionState::AwaitingReady)?;
        tokio::time::sleep(Duration::from_millis(self.config.ready_delay_ms)).await;

        let attempts = self.config.attach_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            self.check_engine_alive()?;
            match self.connector.attach().await {
                Ok(link) => {
                    self.link = Some(link);
                    self.transition(SessionState::Connected)?;
                    info!(attempt, "attached to engine");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "engine attach failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.config.backoff(attempt)).await;
                    }
                }
            }
        }
        self.check_engine_alive()?;
        Err(SessionError::ConnectFailure {
            attempts,
            last_error,
        })
    }

    /// Build the engine model
    pub async fn load_model(
        &mut self,
        model: &AnalyticalModel,
        settings: &AnalysisSettings,
    ) -> Result<(), SessionError> {
        self.transition(SessionState::Driving)?;
        let result = self.link()?.load_model(model, settings).await;
        self.transition(SessionState::Connected)?;
        debug!(members = model.members.len(), "model loaded into engine");
        result.map_err(SessionError::from)
    }

    /// Run the analysis and wait for it to finish
    pub async fn run_analysis(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Driving)?;
        let run = self.link()?.run_analysis().await;
        let result = match run {
            Ok(()) => self.wait_for_analysis().await,
            Err(e) => Err(e.into()),
        };
        self.transition(SessionState::Connected)?;
        result
    }

    /// Read analysis results
    pub async fn results(&mut self) -> Result<AnalysisResults, SessionError> {
        self.transition(SessionState::Driving)?;
        let result = self.link()?.results().await;
        self.transition(SessionState::Connected)?;
        result.map_err(SessionError::from)
    }

    /// Open, analyze `model` and read results, closing on every path
    pub async fn analyze(
        &mut self,
        model: &AnalyticalModel,
        settings: &AnalysisSettings,
    ) -> Result<AnalysisResults, SessionError> {
        let result = self.analyze_inner(model, settings).await;
        self.close().await;
        result
    }

    /// [`analyze`](Self::analyze) bounded by `budget`
    ///
    /// Returns `None` when the budget ran out. The session is closed before
    /// returning either way, so an engine stuck in `Driving` is still detached
    /// and stopped.
    pub async fn analyze_within(
        &mut self,
        model: &AnalyticalModel,
        settings: &AnalysisSettings,
        budget: Duration,
    ) -> Option<Result<AnalysisResults, SessionError>> {
        let result = tokio::time::timeout(budget, self.analyze_inner(model, settings))
            .await
            .ok();
        if result.is_none() {
            warn!(state = ?self.state, budget = ?budget, "analysis budget exhausted, closing session");
        }
        self.close().await;
        result
    }

    async fn analyze_inner(
        &mut self,
        model: &AnalyticalModel,
        settings: &AnalysisSettings,
    ) -> Result<AnalysisResults, SessionError> {
        self.open().await?;
        self.load_model(model, settings).await?;
        self.run_analysis().await?;
        self.results().await
    }

    /// Detach, stop the engine and release the installation
    ///
    /// Never fails; problems are logged. A no-op when already disconnected.
    pub async fn close(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.force(SessionState::Closing);

        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.close().await {
                warn!(error = %e, "engine detach failed");
            }
        }
        if let Some(mut process) = self.process.take() {
            let grace = Duration::from_millis(self.config.exit_grace_ms);
            if process.wait_for_exit(grace).await.is_none() {
                process.terminate().await;
            }
            debug!(engine = %process.program(), "engine stopped");
        }
        self.lease = None;
        self.force(SessionState::Disconnected);
        info!("engine session closed");
    }

    async fn wait_for_analysis(&mut self) -> Result<(), SessionError> {
        let limit = Duration::from_millis(self.config.analysis_timeout_ms);
        let poll = Duration::from_millis(self.config.analysis_poll_ms.max(1));
        let started = Instant::now();
        loop {
            let analyzing = self.link()?.is_analyzing().await?;
            if !analyzing {
                break;
            }
            self.check_engine_alive()?;
            if started.elapsed() >= limit {
                return Err(SessionError::AnalysisTimeout { after: limit });
            }
            debug!(elapsed = ?started.elapsed(), "analysis running");
            tokio::time::sleep(poll).await;
        }
        info!(elapsed = ?started.elapsed(), "analysis finished");
        Ok(())
    }

    // the link stays owned by the session while driving so close can detach it
    fn link(&mut self) -> Result<&mut Box<dyn EngineLink>, SessionError> {
        self.link
            .as_mut()
            .ok_or_else(|| EngineError::Unavailable("session has no engine link".into()).into())
    }

    fn check_engine_alive(&mut self) -> Result<(), SessionError> {
        let Some(process) = self.process.as_mut() else {
            return Ok(());
        };
        match process.try_exit()? {
            Some(status) => Err(SessionError::EngineExited {
                status: status.code(),
            }),
            None => Ok(()),
        }
    }

    fn transition(&mut self, to: SessionState) -> Result<(), SessionError> {
        validate_transition(self.state, to)?;
        debug!(from = ?self.state, to = ?to, "session transition");
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    fn force(&mut self, to: SessionState) {
        if let Err(e) = self.transition(to) {
            error!(error = %e, "forcing session state");
            self.state = to;
            self.history.push(to);
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.state.holds_resources() {
            warn!(state = ?self.state, "session dropped without close; engine process is killed");
        }
    }
}
