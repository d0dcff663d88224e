//! Seams between the session controller and an analysis engine

use crate::error::EngineError;
use async_trait::async_trait;
use bimflow_model::{AnalysisResults, AnalysisSettings, AnalyticalModel};

/// Attaches to a running engine
#[async_trait]
pub trait EngineConnector: Send + Sync {
    /// Try once to attach
    ///
    /// Return [`EngineError::Unavailable`] while the engine is still starting
    /// up; the controller retries with backoff.
    async fn attach(&self) -> Result<Box<dyn EngineLink>, EngineError>;
}

/// An attached engine
#[async_trait]
pub trait EngineLink: Send {
    /// Build the engine model from `model` with the loads in `settings`
    async fn load_model(
        &mut self,
        model: &AnalyticalModel,
        settings: &AnalysisSettings,
    ) -> Result<(), EngineError>;

    /// Start the analysis
    async fn run_analysis(&mut self) -> Result<(), EngineError>;

    /// Whether the analysis started by [`run_analysis`](Self::run_analysis)
    /// is still running
    async fn is_analyzing(&mut self) -> Result<bool, EngineError> {
        Ok(false)
    }

    /// Read displacements and recommendations
    async fn results(&mut self) -> Result<AnalysisResults, EngineError>;

    /// Detach from the engine
    async fn close(&mut self) -> Result<(), EngineError>;
}
