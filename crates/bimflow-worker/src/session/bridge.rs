//! Engine access through an external bridge program
//!
//! The engine's automation API is only reachable from a helper process on
//! the engine host. Each link operation is one bridge invocation, with the
//! job directory as the exchange channel:
//!
//! - `load` reads `analysis_input.json` (model and settings)
//! - `results` writes `engine_results*.json` in [`AnalysisResults`] form

use super::engine::{EngineConnector, EngineLink};
use crate::descriptor::{JobDescriptor, WorkerRole};
use crate::error::{EngineError, LaunchError};
use crate::launcher::{LaunchRequest, ProcessLauncher};
use crate::process::{ProcessHandle, WorkerCommand};
use crate::staging::{ArtifactPattern, JobId, StagingStore, ANALYSIS_INPUT_JSON};
use async_trait::async_trait;
use bimflow_model::{AnalysisResults, AnalysisSettings, AnalyticalModel, ModelError};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Glob for the results file the bridge writes
pub const ENGINE_RESULTS_PATTERN: &str = "engine_results*.json";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EngineInput<'a> {
    model: &'a AnalyticalModel,
    settings: &'a AnalysisSettings,
}

#[derive(Debug)]
struct Bridge {
    command: WorkerCommand,
    store: Arc<StagingStore>,
    job: JobId,
    launcher: ProcessLauncher,
}

impl Bridge {
    fn descriptor(&self) -> JobDescriptor {
        JobDescriptor::build(&self.store, &self.job, WorkerRole::Analyze)
    }

    fn args(&self, op: &str) -> Vec<String> {
        let dir = self.store.job_dir(&self.job);
        let input = dir.join(ANALYSIS_INPUT_JSON).display().to_string();
        let dir = dir.display().to_string();
        self.command.render(&[
            ("op", op),
            ("job_dir", dir.as_str()),
            ("input", input.as_str()),
        ])
    }

    async fn invoke(&self, op: &str) -> Result<(), LaunchError> {
        let descriptor = self.descriptor();
        let handle = ProcessHandle::spawn(
            &self.command,
            &self.args(op),
            Some(&descriptor),
            &self.store.job_dir(&self.job),
        )?;
        let output = handle.finish(self.launcher.config().timeout()).await?;
        debug!(job = %self.job, op, stdout = %output.stdout.trim_end(), "bridge call finished");
        Ok(())
    }
}

/// [`EngineConnector`] backed by a bridge program
///
/// The command's arguments may use `{op}`, `{job_dir}` and `{input}`.
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    bridge: Arc<Bridge>,
}

impl BridgeConnector {
    /// Bridge for `job`, with per-call timeout and polling from `launcher`
    #[must_use]
    pub fn new(
        command: WorkerCommand,
        store: Arc<StagingStore>,
        job: JobId,
        launcher: ProcessLauncher,
    ) -> Self {
        Self {
            bridge: Arc::new(Bridge {
                command,
                store,
                job,
                launcher,
            }),
        }
    }
}

#[async_trait]
impl EngineConnector for BridgeConnector {
    async fn attach(&self) -> Result<Box<dyn EngineLink>, EngineError> {
        match self.bridge.invoke("attach").await {
            Ok(()) => Ok(Box::new(BridgeLink {
                bridge: Arc::clone(&self.bridge),
            })),
            Err(LaunchError::ProcessFailure { stderr, .. }) => {
                Err(EngineError::Unavailable(stderr.trim().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

struct BridgeLink {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl EngineLink for BridgeLink {
    async fn load_model(
        &mut self,
        model: &AnalyticalModel,
        settings: &AnalysisSettings,
    ) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec_pretty(&EngineInput { model, settings })
            .map_err(ModelError::from)?;
        self.bridge
            .store
            .write(&self.bridge.job, ANALYSIS_INPUT_JSON, &bytes)
            .await?;
        Ok(self.bridge.invoke("load").await?)
    }

    async fn run_analysis(&mut self) -> Result<(), EngineError> {
        Ok(self.bridge.invoke("analyze").await?)
    }

    async fn results(&mut self) -> Result<AnalysisResults, EngineError> {
        let descriptor = self.bridge.descriptor();
        let outcome = self
            .bridge
            .launcher
            .run(LaunchRequest {
                job: self.bridge.job,
                command: &self.bridge.command,
                args: self.bridge.args("results"),
                descriptor: &descriptor,
                expect: ArtifactPattern::new(ENGINE_RESULTS_PATTERN)?,
            })
            .await?;
        let bytes = self.bridge.store.read(&outcome.artifact.path).await?;
        let results = serde_json::from_slice(&bytes).map_err(ModelError::from)?;
        Ok(results)
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        Ok(self.bridge.invoke("close").await?)
    }
}
