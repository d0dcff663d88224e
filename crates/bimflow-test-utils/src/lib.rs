//! Testing utilities for the bimflow workspace
//!
//! Model fixtures, a scripted engine connector and shell-script workers.

#![allow(missing_docs)]

use async_trait::async_trait;
use bimflow_model::{
    AnalysisResults, AnalysisSettings, AnalyticalModel, CrossSection, Line, Member, MemberId,
    Node, SectionId,
};
use bimflow_worker::{
    EngineConnector, EngineError, EngineLink, LauncherConfig, StagingStore, WorkerCommand,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Two nodes, one line, one section, one member (id 10, section 100)
pub fn minimal_model() -> AnalyticalModel {
    AnalyticalModel {
        nodes: vec![Node::new(1, 0.0, 0.0, 0.0), Node::new(2, 6.0, 0.0, 0.0)],
        lines: vec![Line::new(10, 1, 2)],
        cross_sections: vec![CrossSection::named(100, "W310X39")],
        members: vec![Member::new(10, 10, 100)],
    }
}

/// A beam and a column sharing node 2, with a spare heavier section 300
pub fn frame_model() -> AnalyticalModel {
    AnalyticalModel {
        nodes: vec![
            Node::new(1, 0.0, 0.0, 0.0),
            Node::new(2, 0.0, 0.0, 4.0),
            Node::new(3, 6.0, 0.0, 4.0),
        ],
        lines: vec![Line::new(10, 1, 2), Line::new(20, 2, 3)],
        cross_sections: vec![
            CrossSection::named(100, "W250X49"),
            CrossSection::named(200, "W310X39"),
            CrossSection::named(300, "W410X60"),
        ],
        members: vec![Member::new(10, 10, 100), Member::new(20, 20, 200)],
    }
}

/// Raw export, as written by the extraction script, for [`frame_model`]'s members
pub fn raw_export() -> Value {
    json!({
        "analytical_members": [
            {
                "id": 10, "nodeI": 1, "nodeJ": 2,
                "endpoints": {"i": [0.0, 0.0, 0.0], "j": [0.0, 0.0, 4.0]},
                "section": {"type_id": 100, "type_name": "W250X49"},
                "section_properties": {"STRUCTURAL_SECTION_AREA": 0.00626},
                "structural_role": "Column"
            },
            {
                "id": 20, "nodeI": 2, "nodeJ": 3,
                "endpoints": {"i": [0.0, 0.0, 4.0], "j": [6.0, 0.0, 4.0]},
                "section": {"type_id": 200, "type_name": "W310X39"},
                "section_properties": {},
                "structural_role": "Beam"
            }
        ]
    })
}

/// Load case 1 results from `(member, mm)` and `(member, section)` pairs
pub fn results_with(
    displacements: &[(i64, f64)],
    recommended: &[(i64, i64)],
) -> AnalysisResults {
    AnalysisResults {
        load_case: 1,
        member_displacements: displacements
            .iter()
            .map(|(m, d)| (MemberId(*m), *d))
            .collect(),
        recommended_sections: recommended
            .iter()
            .map(|(m, s)| (MemberId(*m), SectionId(*s)))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// Staging store in a fresh temporary directory
pub fn temp_store() -> (TempDir, Arc<StagingStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(StagingStore::new(dir.path()).unwrap());
    (dir, store)
}

/// `sh -c <script>`; positional placeholders follow as `$1`, `$2`, ...
pub fn sh_worker(script: &str) -> WorkerCommand {
    WorkerCommand::new("sh")
        .with_arg("-c")
        .with_arg(script)
        .with_arg("worker")
}

/// Launcher settings scaled for tests
pub fn fast_launcher() -> LauncherConfig {
    LauncherConfig::default()
        .with_poll_interval(Duration::from_millis(50))
        .with_timeout(Duration::from_secs(10))
        .with_exit_grace(Duration::from_millis(500))
}

/// Engine connector with scripted behavior and a shared call log
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    pub failing_attaches: u32,
    pub analyzing_polls: u32,
    pub fail_on: Option<&'static str>,
    pub results: AnalysisResults,
    attaches: Arc<AtomicU32>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    pub fn returning(results: AnalysisResults) -> Self {
        Self {
            results,
            ..Self::default()
        }
    }

    pub fn failing_attaches(mut self, count: u32) -> Self {
        self.failing_attaches = count;
        self
    }

    pub fn analyzing_for(mut self, polls: u32) -> Self {
        self.analyzing_polls = polls;
        self
    }

    /// Make the named link operation fail
    pub fn failing_on(mut self, operation: &'static str) -> Self {
        self.fail_on = Some(operation);
        self
    }

    pub fn attach_count(&self) -> u32 {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl EngineConnector for ScriptedConnector {
    async fn attach(&self) -> Result<Box<dyn EngineLink>, EngineError> {
        let n = self.attaches.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().push("attach".into());
        if n <= self.failing_attaches {
            return Err(EngineError::Unavailable(format!("not ready ({n})")));
        }
        Ok(Box::new(ScriptedLink {
            script: self.clone(),
            polls_left: self.analyzing_polls,
        }))
    }
}

struct ScriptedLink {
    script: ScriptedConnector,
    polls_left: u32,
}

impl ScriptedLink {
    fn record(&self, operation: &'static str) -> Result<(), EngineError> {
        self.script.calls.lock().push(operation.into());
        if self.script.fail_on == Some(operation) {
            return Err(EngineError::Operation {
                operation: operation.into(),
                message: "scripted failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EngineLink for ScriptedLink {
    async fn load_model(
        &mut self,
        _model: &AnalyticalModel,
        _settings: &AnalysisSettings,
    ) -> Result<(), EngineError> {
        self.record("load")
    }

    async fn run_analysis(&mut self) -> Result<(), EngineError> {
        self.record("analyze")
    }

    async fn is_analyzing(&mut self) -> Result<bool, EngineError> {
        if self.polls_left == 0 {
            return Ok(false);
        }
        self.polls_left -= 1;
        Ok(true)
    }

    async fn results(&mut self) -> Result<AnalysisResults, EngineError> {
        self.record("results")?;
        Ok(self.script.results.clone())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.record("close")
    }
}
