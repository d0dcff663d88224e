//! Step bodies shared by the flows
//!
//! Each method is one pipeline step. Steps read their predecessors' outputs
//! from [`StepInputs`] and touch the outside world only through the staging
//! store, the launcher and the engine session.

use super::ConnectorFactory;
use crate::config::OrchestratorConfig;
use crate::error::FlowError;
use crate::source::ModelSource;
use bimflow_kernel::{StepInputs, StepTimedOut};
use bimflow_model::{
    apply_edits, check_serviceability, error_envelope, normalize_export, parse, serialize,
    AnalysisResults, AnalysisSettings, AnalyticalModel, EditInstruction, ModelError,
    ServiceabilityReport,
};
use bimflow_worker::staging::{
    ANALYSIS_INPUT_JSON, ANALYSIS_RESULTS_JSON, INPUT_JSON, OUTPUT_JSON, UPDATED_MODEL_STEM,
};
use bimflow_worker::{
    safe_file_name, ArtifactInfo, ArtifactPattern, JobDescriptor, JobId, LaunchRequest,
    ProcessLauncher, SessionController, StagingStore, WorkerCommand, WorkerRole,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Stage the original model
pub const STAGE_MODEL: &str = "stage_model";
/// Run the export worker
pub const RUN_EXTRACTION: &str = "run_extraction";
/// Record the raw export in the pointer file
pub const WRITE_POINTER: &str = "write_pointer";
/// Normalize the raw export
pub const NORMALIZE: &str = "normalize";
/// Write `output.json` and the baseline `input.json`
pub const WRITE_OUTPUT: &str = "write_output";
/// Read `output.json`
pub const LOAD_OUTPUT: &str = "load_output";
/// Apply edit instructions
pub const APPLY_EDITS: &str = "apply_edits";
/// Write `input.json`
pub const WRITE_INPUT: &str = "write_input";
/// Read `input.json`
pub const LOAD_INPUT: &str = "load_input";
/// Drive the analysis engine
pub const RUN_ANALYSIS: &str = "run_analysis";
/// Check deflections against the allowable limit
pub const SERVICEABILITY: &str = "serviceability";
/// Turn recommended sections into edits
pub const RECOMMEND: &str = "recommend";
/// Validate `input.json` before the update
pub const CHECK_INPUT: &str = "check_input";
/// Locate the original model
pub const CHECK_MODEL: &str = "check_model";
/// Run the update worker
pub const RUN_UPDATE: &str = "run_update";
/// Copy the update result to its deterministic name
pub const PROMOTE: &str = "promote";

/// Files the orchestrator owns, never mistaken for worker output
const RESERVED: [&str; 4] = [OUTPUT_JSON, INPUT_JSON, ANALYSIS_INPUT_JSON, ANALYSIS_RESULTS_JSON];

/// Original model as staged in the job directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedModel {
    /// Staged file name
    pub file_name: String,
    /// Absolute path
    pub path: PathBuf,
}

/// Everything a step needs, shared by all steps of one flow run
pub(crate) struct FlowContext {
    pub(crate) job: JobId,
    pub(crate) config: Arc<OrchestratorConfig>,
    pub(crate) store: Arc<StagingStore>,
    pub(crate) launcher: ProcessLauncher,
    pub(crate) connectors: ConnectorFactory,
}

impl FlowContext {
    pub(crate) async fn stage_model(
        &self,
        source: &dyn ModelSource,
    ) -> Result<StagedModel, FlowError> {
        let fetched = source.fetch().await?;
        let stem = Path::new(&fetched.file_name)
            .file_stem()
            .map_or_else(|| "model".to_string(), |s| s.to_string_lossy().into_owned());
        let file_name = safe_file_name(&stem, &self.config.model_extension);
        let path = self.store.stage(&self.job, &file_name, &fetched.bytes).await?;
        info!(job = %self.job, origin = %source.origin(), file = %file_name, bytes = fetched.bytes.len(), "model staged");
        Ok(StagedModel { file_name, path })
    }

    pub(crate) async fn run_extraction(&self, inputs: &StepInputs) -> Result<ArtifactInfo, FlowError> {
        let staged = inputs.get::<StagedModel>(STAGE_MODEL)?;
        let expect = ArtifactPattern::new("*.json")?.excluding(&RESERVED);
        self.run_worker(&self.config.extract_worker, WorkerRole::Extract, &staged.path, expect)
            .await
    }

    pub(crate) async fn write_pointer(&self, inputs: &StepInputs) -> Result<PathBuf, FlowError> {
        let raw = inputs.get::<ArtifactInfo>(RUN_EXTRACTION)?;
        Ok(self.store.write_pointer(&self.job, &raw.path).await?)
    }

    /// On failure the raw payload is kept as an error envelope in `output.json`
    pub(crate) async fn normalize(&self, inputs: &StepInputs) -> Result<AnalyticalModel, FlowError> {
        let raw = inputs.get::<ArtifactInfo>(RUN_EXTRACTION)?;
        let bytes = self.store.read(&raw.path).await?;
        let (value, result) = match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => {
                let result = normalize_export(&value);
                (value, result)
            }
            Err(e) => (
                Value::String(String::from_utf8_lossy(&bytes).into_owned()),
                Err(ModelError::from(e)),
            ),
        };
        match result {
            Ok(model) => {
                info!(
                    job = %self.job,
                    nodes = model.nodes.len(),
                    lines = model.lines.len(),
                    sections = model.cross_sections.len(),
                    members = model.members.len(),
                    "export normalized"
                );
                Ok(model)
            }
            Err(err) => {
                let envelope = serde_json::to_vec_pretty(&error_envelope(value, &err))?;
                self.store.write(&self.job, OUTPUT_JSON, &envelope).await?;
                error!(job = %self.job, error = %err, "export rejected; raw payload kept in output.json");
                Err(err.into())
            }
        }
    }

    pub(crate) async fn write_output(&self, inputs: &StepInputs) -> Result<PathBuf, FlowError> {
        let model = inputs.get::<AnalyticalModel>(NORMALIZE)?;
        let text = serialize(model)?;
        let output = self.store.write(&self.job, OUTPUT_JSON, text.as_bytes()).await?;
        self.store.write(&self.job, INPUT_JSON, text.as_bytes()).await?;
        Ok(output)
    }

    pub(crate) async fn load_output(&self) -> Result<AnalyticalModel, FlowError> {
        self.load_model(OUTPUT_JSON).await
    }

    pub(crate) async fn load_input(&self) -> Result<AnalyticalModel, FlowError> {
        self.load_model(INPUT_JSON).await
    }

    /// `None` when nothing was requested
    pub(crate) fn apply_edits(
        &self,
        inputs: &StepInputs,
        edits: &EditInstruction,
    ) -> Result<Option<AnalyticalModel>, FlowError> {
        if edits.is_no_change() {
            return Ok(None);
        }
        let original = inputs.get::<AnalyticalModel>(LOAD_OUTPUT)?;
        let edited = apply_edits(original, edits)?;
        info!(job = %self.job, overrides = edits.overrides.len(), revert = edits.revert_to_original, "edits applied");
        Ok(Some(edited))
    }

    pub(crate) async fn write_input(&self, inputs: &StepInputs) -> Result<PathBuf, FlowError> {
        let edited = inputs.get::<Option<AnalyticalModel>>(APPLY_EDITS)?;
        if let Some(model) = edited {
            return self.write_model(INPUT_JSON, model).await;
        }
        // no change keeps earlier edits; a missing input falls back to the baseline
        match self.store.discover_by_exact_name(&self.job, INPUT_JSON).await {
            Ok(path) => Ok(path),
            Err(_) => {
                let original = inputs.get::<AnalyticalModel>(LOAD_OUTPUT)?;
                self.write_model(INPUT_JSON, original).await
            }
        }
    }

    pub(crate) async fn run_analysis(
        &self,
        inputs: &StepInputs,
        settings: &AnalysisSettings,
    ) -> Result<AnalysisResults, FlowError> {
        let model = inputs.get::<AnalyticalModel>(LOAD_INPUT)?;
        let connector = (self.connectors)(&self.job);
        let mut session =
            SessionController::new(self.config.session.clone(), connector, self.store.job_dir(&self.job));
        let budget = self.config.analysis_step_timeout();
        let results = session
            .analyze_within(model, settings, budget)
            .await
            .ok_or_else(|| StepTimedOut {
                step: RUN_ANALYSIS.to_string(),
                after: budget,
            })??;
        let bytes = serde_json::to_vec_pretty(&results)?;
        self.store.write(&self.job, ANALYSIS_RESULTS_JSON, &bytes).await?;
        info!(job = %self.job, load_case = results.load_case, members = results.member_displacements.len(), "analysis results stored");
        Ok(results)
    }

    pub(crate) fn serviceability(
        &self,
        inputs: &StepInputs,
        settings: &AnalysisSettings,
    ) -> Result<ServiceabilityReport, FlowError> {
        let results = inputs.get::<AnalysisResults>(RUN_ANALYSIS)?;
        let report = check_serviceability(results, settings);
        for check in report.failing() {
            warn!(
                job = %self.job,
                member = %check.member,
                displacement_mm = check.displacement_mm,
                allowable_mm = report.allowable_deformation_mm,
                "member exceeds allowable deformation"
            );
        }
        Ok(report)
    }

    pub(crate) async fn recommend(
        &self,
        inputs: &StepInputs,
        apply: bool,
    ) -> Result<EditInstruction, FlowError> {
        let model = inputs.get::<AnalyticalModel>(LOAD_INPUT)?;
        let results = inputs.get::<AnalysisResults>(RUN_ANALYSIS)?;
        let edits = EditInstruction::from_recommendations(&results.recommended_sections);
        let edited = apply_edits(model, &edits)?;
        if apply && !edits.is_no_change() {
            self.write_model(INPUT_JSON, &edited).await?;
            info!(job = %self.job, overrides = edits.overrides.len(), "recommended sections written to input.json");
        }
        Ok(edits)
    }

    pub(crate) async fn check_input(&self) -> Result<PathBuf, FlowError> {
        let path = self.store.discover_by_exact_name(&self.job, INPUT_JSON).await?;
        let text = String::from_utf8_lossy(&self.store.read(&path).await?).into_owned();
        parse(&text)?;
        Ok(path)
    }

    pub(crate) async fn check_model(&self) -> Result<ArtifactInfo, FlowError> {
        let ext = &self.config.model_extension;
        let updated = format!("{UPDATED_MODEL_STEM}.{ext}");
        let pattern = ArtifactPattern::new(&format!("*.{ext}"))?.excluding(&[updated.as_str()]);
        Ok(self.store.discover_newest(&self.job, &pattern).await?)
    }

    pub(crate) async fn run_update(&self, inputs: &StepInputs) -> Result<ArtifactInfo, FlowError> {
        let model = inputs.get::<ArtifactInfo>(CHECK_MODEL)?;
        let ext = &self.config.model_extension;
        let updated = format!("{UPDATED_MODEL_STEM}.{ext}");
        // the source model may still be inside the discovery watermark
        let expect = ArtifactPattern::new(&format!("*.{ext}"))?
            .excluding(&[model.name.as_str(), updated.as_str()]);
        self.run_worker(&self.config.update_worker, WorkerRole::Update, &model.path, expect)
            .await
    }

    pub(crate) async fn promote(&self, inputs: &StepInputs) -> Result<PathBuf, FlowError> {
        let result = inputs.get::<ArtifactInfo>(RUN_UPDATE)?;
        let path = self
            .store
            .promote(&self.job, &result.path, UPDATED_MODEL_STEM)
            .await?;
        info!(job = %self.job, path = %path.display(), "updated model ready");
        Ok(path)
    }

    async fn run_worker(
        &self,
        command: &WorkerCommand,
        role: WorkerRole,
        model: &Path,
        expect: ArtifactPattern,
    ) -> Result<ArtifactInfo, FlowError> {
        let descriptor = JobDescriptor::build(&self.store, &self.job, role);
        let job_dir = self.store.job_dir(&self.job).display().to_string();
        let model = model.display().to_string();
        let input = self.store.job_dir(&self.job).join(INPUT_JSON).display().to_string();
        let args = command.render(&[
            ("model", model.as_str()),
            ("job_dir", job_dir.as_str()),
            ("input", input.as_str()),
        ]);
        let outcome = self
            .launcher
            .run(LaunchRequest {
                job: self.job,
                command,
                args,
                descriptor: &descriptor,
                expect,
            })
            .await?;
        Ok(outcome.artifact)
    }

    async fn load_model(&self, name: &str) -> Result<AnalyticalModel, FlowError> {
        let path = self.store.discover_by_exact_name(&self.job, name).await?;
        let bytes = self.store.read(&path).await?;
        Ok(parse(&String::from_utf8_lossy(&bytes))?)
    }

    async fn write_model(&self, name: &str, model: &AnalyticalModel) -> Result<PathBuf, FlowError> {
        let text = serialize(model)?;
        Ok(self.store.write(&self.job, name, text.as_bytes()).await?)
    }
}
