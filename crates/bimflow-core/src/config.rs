//! Orchestrator configuration
//!
//! Loaded from TOML; every key is optional. Installation paths and timeouts
//! live here and nowhere else.

use bimflow_model::AnalysisSettings;
use bimflow_worker::{LauncherConfig, SessionConfig, WorkerCommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration loading failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid configuration
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },
}

/// Configuration for every flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Directory holding one subdirectory per job
    pub staging_root: PathBuf,
    /// Extension of the BIM model files
    pub model_extension: String,
    /// Worker polling and timeouts
    pub launcher: LauncherConfig,
    /// Analysis engine session
    pub session: SessionConfig,
    /// Analytical export script; `{model}` and `{job_dir}` are substituted
    pub extract_worker: WorkerCommand,
    /// Model update script; `{model}`, `{input}` and `{job_dir}` are substituted
    pub update_worker: WorkerCommand,
    /// Engine automation bridge; `{op}`, `{input}` and `{job_dir}` are substituted
    pub analysis_bridge: WorkerCommand,
    /// Default loads and limits
    pub analysis: AnalysisSettings,
    /// Budget for the whole analysis step, in milliseconds
    pub analysis_step_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            staging_root: PathBuf::from("staging"),
            model_extension: "rvt".into(),
            launcher: LauncherConfig::default(),
            session: SessionConfig::default(),
            extract_worker: WorkerCommand::new("pyrevit")
                .with_arg("run")
                .with_arg("scripts/export_analytical.py")
                .with_arg("{model}"),
            update_worker: WorkerCommand::new("pyrevit")
                .with_arg("run")
                .with_arg("scripts/update_analytical.py")
                .with_arg("{model}"),
            analysis_bridge: WorkerCommand::new("bimflow-staad-bridge").with_arg("{op}"),
            analysis: AnalysisSettings::default(),
            analysis_step_timeout_ms: 45 * 60 * 1_000,
        }
    }
}

impl OrchestratorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse TOML text
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// With staging root
    #[inline]
    #[must_use]
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = root.into();
        self
    }

    /// With model extension
    #[inline]
    #[must_use]
    pub fn with_model_extension(mut self, ext: impl Into<String>) -> Self {
        self.model_extension = ext.into();
        self
    }

    /// With launcher settings
    #[inline]
    #[must_use]
    pub fn with_launcher(mut self, launcher: LauncherConfig) -> Self {
        self.launcher = launcher;
        self
    }

    /// With session settings
    #[inline]
    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// With extraction worker
    #[inline]
    #[must_use]
    pub fn with_extract_worker(mut self, worker: WorkerCommand) -> Self {
        self.extract_worker = worker;
        self
    }

    /// With update worker
    #[inline]
    #[must_use]
    pub fn with_update_worker(mut self, worker: WorkerCommand) -> Self {
        self.update_worker = worker;
        self
    }

    /// With analysis bridge
    #[inline]
    #[must_use]
    pub fn with_analysis_bridge(mut self, bridge: WorkerCommand) -> Self {
        self.analysis_bridge = bridge;
        self
    }

    /// With analysis step budget
    #[inline]
    #[must_use]
    pub fn with_analysis_step_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_step_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Analysis step budget
    #[must_use]
    pub fn analysis_step_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_step_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(OrchestratorConfig::from_toml("").unwrap(), OrchestratorConfig::default());
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = OrchestratorConfig::from_toml(
            r#"
            staging_root = "/srv/bimflow"

            [launcher]
            timeout_ms = 60000
            completion_marker = "done.flag"

            [session]
            attach_attempts = 8

            [analysis]
            allowableDeformationMm = 25.0

            [update_worker]
            program = "revit-update"
            args = ["{model}", "{input}"]
            "#,
        )
        .unwrap();

        assert_eq!(config.staging_root, PathBuf::from("/srv/bimflow"));
        assert_eq!(config.launcher.timeout_ms, 60_000);
        assert_eq!(config.launcher.poll_interval_ms, LauncherConfig::default().poll_interval_ms);
        assert_eq!(config.launcher.completion_marker.as_deref(), Some("done.flag"));
        assert_eq!(config.session.attach_attempts, 8);
        assert_eq!(config.session.ready_delay_ms, SessionConfig::default().ready_delay_ms);
        assert_eq!(config.analysis.allowable_deformation_mm, 25.0);
        assert_eq!(config.analysis.load_magnitude_kn, 1.0);
        assert_eq!(config.update_worker.args, vec!["{model}", "{input}"]);
        assert_eq!(config.model_extension, "rvt");
    }

    #[test]
    fn unreadable_file_names_the_path() {
        let err = OrchestratorConfig::load(Path::new("/nonexistent/bimflow.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/bimflow.toml"));
    }
}
