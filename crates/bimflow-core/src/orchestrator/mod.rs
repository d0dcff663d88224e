//! The four bimflow flows
//!
//! Each flow is a [`Pipeline`](bimflow_kernel::Pipeline) of named steps run
//! against one job directory. Step failures never escape a flow: they are
//! recorded in the returned [`FlowRun`]'s report, which is also written to
//! `reports/<flow>.json` in the job directory.
//!
//! ```text
//! extract : stage_model -> run_extraction -> write_pointer
//!                                         -> normalize -> write_output
//! modify  : load_output -> apply_edits -> write_input
//! analyze : load_input -> run_analysis -> serviceability
//!                                      -> recommend
//! update  : check_input ---+
//!           check_model ---+-> run_update -> promote
//! ```

mod steps;

pub use steps::{
    StagedModel, APPLY_EDITS, CHECK_INPUT, CHECK_MODEL, LOAD_INPUT, LOAD_OUTPUT, NORMALIZE,
    PROMOTE, RECOMMEND, RUN_ANALYSIS, RUN_EXTRACTION, RUN_UPDATE, SERVICEABILITY, STAGE_MODEL,
    WRITE_INPUT, WRITE_OUTPUT, WRITE_POINTER,
};

use crate::config::OrchestratorConfig;
use crate::error::FlowError;
use crate::source::ModelSource;
use bimflow_kernel::{PipelineBuilder, ReportSummary, StepInputs, StepReport, StepSpec};
use bimflow_model::{AnalysisResults, AnalysisSettings, AnalyticalModel, EditInstruction};
use bimflow_worker::staging::REPORTS_DIR;
use bimflow_worker::{
    BridgeConnector, EngineConnector, JobId, ProcessLauncher, StagingStore,
};
use std::any::Any;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use steps::FlowContext;
use tracing::{error, info, warn};

/// Builds the engine connector for a job
pub type ConnectorFactory = Arc<dyn Fn(&JobId) -> Arc<dyn EngineConnector> + Send + Sync>;

/// Result of one flow run
#[derive(Debug)]
pub struct FlowRun<T> {
    /// Job the flow ran against
    pub job: JobId,
    /// Per-step outcomes
    pub report: StepReport<FlowError>,
    /// Flow result, present when its producing step succeeded
    pub value: Option<T>,
}

impl<T> FlowRun<T> {
    /// Whether every step succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }

    /// Serializable view of the report
    #[must_use]
    pub fn summary(&self) -> ReportSummary {
        self.report.summary()
    }
}

/// Runs flows against a staging store
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    store: Arc<StagingStore>,
    launcher: ProcessLauncher,
    connectors: ConnectorFactory,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("staging_root", &self.store.root())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator driving the analysis engine through the configured bridge
    pub fn new(config: OrchestratorConfig) -> Result<Self, FlowError> {
        let store = Arc::new(StagingStore::new(&config.staging_root)?);
        let launcher = ProcessLauncher::new(config.launcher.clone(), Arc::clone(&store));
        let bridge = config.analysis_bridge.clone();
        let connectors: ConnectorFactory = {
            let store = Arc::clone(&store);
            let launcher = launcher.clone();
            Arc::new(move |job: &JobId| -> Arc<dyn EngineConnector> {
                Arc::new(BridgeConnector::new(
                    bridge.clone(),
                    Arc::clone(&store),
                    *job,
                    launcher.clone(),
                ))
            })
        };
        Ok(Self {
            config: Arc::new(config),
            store,
            launcher,
            connectors,
        })
    }

    /// Replace how engine connectors are built
    #[must_use]
    pub fn with_connectors(mut self, connectors: ConnectorFactory) -> Self {
        self.connectors = connectors;
        self
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Staging store
    #[must_use]
    pub fn store(&self) -> &StagingStore {
        &self.store
    }

    /// Stage `source` in a new job, export its analytical model and normalize it
    pub async fn extract(
        &self,
        source: Arc<dyn ModelSource>,
    ) -> Result<FlowRun<AnalyticalModel>, FlowError> {
        let job = self.store.create_job().await?;
        let ctx = self.context(job);
        info!(job = %job, origin = %source.origin(), "extract flow started");

        let pipeline = PipelineBuilder::new("extract")
            .add(step(STAGE_MODEL, &ctx, move |ctx, _| {
                let source = Arc::clone(&source);
                async move { ctx.stage_model(&*source).await }
            }))
            .add(
                step(RUN_EXTRACTION, &ctx, |ctx, inputs| async move {
                    ctx.run_extraction(&inputs).await
                })
                .after(&[STAGE_MODEL]),
            )
            .add(
                step(WRITE_POINTER, &ctx, |ctx, inputs| async move {
                    ctx.write_pointer(&inputs).await
                })
                .after(&[RUN_EXTRACTION]),
            )
            .add(
                step(NORMALIZE, &ctx, |ctx, inputs| async move {
                    ctx.normalize(&inputs).await
                })
                .after(&[RUN_EXTRACTION]),
            )
            .add(
                step(WRITE_OUTPUT, &ctx, |ctx, inputs| async move {
                    ctx.write_output(&inputs).await
                })
                .after(&[NORMALIZE]),
            )
            .build()?;

        self.finish(job, pipeline.execute().await?, NORMALIZE).await
    }

    /// Apply `edits` to the job's extracted model and write `input.json`
    ///
    /// A no-change instruction keeps an existing `input.json`; a revert
    /// rewrites it from `output.json`.
    pub async fn modify(
        &self,
        job: JobId,
        edits: EditInstruction,
    ) -> Result<FlowRun<PathBuf>, FlowError> {
        self.require_job(&job).await?;
        let ctx = self.context(job);
        info!(job = %job, overrides = edits.overrides.len(), revert = edits.revert_to_original, "modify flow started");

        let pipeline = PipelineBuilder::new("modify")
            .add(step(LOAD_OUTPUT, &ctx, |ctx, _| async move { ctx.load_output().await }))
            .add(
                step(APPLY_EDITS, &ctx, move |ctx, inputs| {
                    let edits = edits.clone();
                    async move { ctx.apply_edits(&inputs, &edits) }
                })
                .after(&[LOAD_OUTPUT]),
            )
            .add(
                step(WRITE_INPUT, &ctx, |ctx, inputs| async move {
                    ctx.write_input(&inputs).await
                })
                .after(&[LOAD_OUTPUT, APPLY_EDITS]),
            )
            .build()?;

        self.finish(job, pipeline.execute().await?, WRITE_INPUT).await
    }

    /// Analyze the job's `input.json` and check serviceability
    ///
    /// With `apply_recommendations`, the engine's recommended sections are
    /// written back to `input.json`.
    pub async fn analyze(
        &self,
        job: JobId,
        settings: AnalysisSettings,
        apply_recommendations: bool,
    ) -> Result<FlowRun<AnalysisResults>, FlowError> {
        self.require_job(&job).await?;
        let ctx = self.context(job);
        info!(
            job = %job,
            load_kn = settings.load_magnitude_kn,
            allowable_mm = settings.allowable_deformation_mm,
            "analyze flow started"
        );

        let pipeline = PipelineBuilder::new("analyze")
            .add(step(LOAD_INPUT, &ctx, |ctx, _| async move { ctx.load_input().await }))
            .add(
                // budgeted inside the step so the session closes before it fails
                step(RUN_ANALYSIS, &ctx, move |ctx, inputs| async move {
                    ctx.run_analysis(&inputs, &settings).await
                })
                .after(&[LOAD_INPUT]),
            )
            .add(
                step(SERVICEABILITY, &ctx, move |ctx, inputs| async move {
                    ctx.serviceability(&inputs, &settings)
                })
                .after(&[RUN_ANALYSIS]),
            )
            .add(
                step(RECOMMEND, &ctx, move |ctx, inputs| async move {
                    ctx.recommend(&inputs, apply_recommendations).await
                })
                .after(&[LOAD_INPUT, RUN_ANALYSIS]),
            )
            .build()?;

        self.finish(job, pipeline.execute().await?, RUN_ANALYSIS).await
    }

    /// Write `input.json` back into the job's model
    pub async fn update(&self, job: JobId) -> Result<FlowRun<PathBuf>, FlowError> {
        self.require_job(&job).await?;
        let ctx = self.context(job);
        info!(job = %job, "update flow started");

        let pipeline = PipelineBuilder::new("update")
            .add(step(CHECK_INPUT, &ctx, |ctx, _| async move { ctx.check_input().await }))
            .add(step(CHECK_MODEL, &ctx, |ctx, _| async move { ctx.check_model().await }))
            .add(
                step(RUN_UPDATE, &ctx, |ctx, inputs| async move {
                    ctx.run_update(&inputs).await
                })
                .after(&[CHECK_INPUT, CHECK_MODEL]),
            )
            .add(
                step(PROMOTE, &ctx, |ctx, inputs| async move { ctx.promote(&inputs).await })
                    .after(&[RUN_UPDATE]),
            )
            .build()?;

        self.finish(job, pipeline.execute().await?, PROMOTE).await
    }

    /// Reports stored for a job, ordered by flow name
    pub async fn reports(&self, job: JobId) -> Result<Vec<ReportSummary>, FlowError> {
        self.require_job(&job).await?;
        let dir = self.store.job_dir(&job).join(REPORTS_DIR);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(FlowError::Report {
                    path: dir,
                    message: e.to_string(),
                })
            }
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| FlowError::Report {
            path: dir.clone(),
            message: e.to_string(),
        })? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut summaries = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = self.store.read(&path).await?;
            let summary = serde_json::from_slice(&bytes).map_err(|e| FlowError::Report {
                path: path.clone(),
                message: e.to_string(),
            })?;
            summaries.push(summary);
        }
        Ok(summaries)
    }

    fn context(&self, job: JobId) -> Arc<FlowContext> {
        Arc::new(FlowContext {
            job,
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            launcher: self.launcher.clone(),
            connectors: Arc::clone(&self.connectors),
        })
    }

    async fn require_job(&self, job: &JobId) -> Result<(), FlowError> {
        if self.store.job_exists(job).await {
            Ok(())
        } else {
            Err(FlowError::UnknownJob(*job))
        }
    }

    async fn finish<T: Clone + Any + Send + Sync>(
        &self,
        job: JobId,
        report: StepReport<FlowError>,
        value_step: &str,
    ) -> Result<FlowRun<T>, FlowError> {
        let summary = report.summary();
        match serde_json::to_vec_pretty(&summary) {
            Ok(bytes) => {
                let name = format!("{}.json", report.pipeline());
                if let Err(e) = self.store.write_report(&job, &name, &bytes).await {
                    warn!(job = %job, error = %e, "could not store flow report");
                }
            }
            Err(e) => warn!(job = %job, error = %e, "could not encode flow report"),
        }

        for (step, err) in report.failures() {
            error!(job = %job, step, error = %err, retryable = err.is_retryable(), "step failed");
        }
        for (step, cause) in report.skipped() {
            warn!(job = %job, step, caused_by = cause, "step skipped");
        }
        info!(job = %job, flow = report.pipeline(), succeeded = summary.succeeded, "flow finished");

        let value = report.output::<T>(value_step).map(|v| T::clone(&v));
        Ok(FlowRun { job, report, value })
    }
}

/// Wrap a step body that needs the flow context
fn step<F, Fut, T>(name: &str, ctx: &Arc<FlowContext>, body: F) -> StepSpec<FlowError>
where
    F: Fn(Arc<FlowContext>, StepInputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FlowError>> + Send + 'static,
    T: Any + Send + Sync,
{
    let ctx = Arc::clone(ctx);
    StepSpec::new(name, move |inputs| body(Arc::clone(&ctx), inputs))
}
