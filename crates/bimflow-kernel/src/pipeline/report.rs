//! Step outcomes and the per-run report

use super::StepValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Result of one step in one run
#[derive(Debug)]
pub enum StepOutcome<E> {
    /// Step ran and produced a value
    Success,
    /// Step ran and failed
    Failed(E),
    /// Step was not started because a dependency did not succeed
    Skipped {
        /// Failed step at the root of the chain
        caused_by: String,
    },
}

impl<E> StepOutcome<E> {
    /// Whether the step succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Status label used in summaries
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed(_) => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// One step's entry in a report
#[derive(Debug)]
pub struct StepRecord<E> {
    /// Step name
    pub name: String,
    /// Outcome
    pub outcome: StepOutcome<E>,
    /// When the step started, `None` when skipped
    pub started_at: Option<DateTime<Utc>>,
    /// Wall time spent in the step
    pub elapsed: Duration,
}

/// Outcome of every step of one pipeline run, in execution order
#[derive(Debug)]
pub struct StepReport<E> {
    pub(crate) pipeline: String,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) finished_at: DateTime<Utc>,
    pub(crate) records: Vec<StepRecord<E>>,
    pub(crate) outputs: HashMap<String, StepValue>,
}

impl<E> StepReport<E> {
    /// Pipeline name
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Records in execution order
    #[must_use]
    pub fn records(&self) -> &[StepRecord<E>] {
        &self.records
    }

    /// Outcome of a named step
    #[must_use]
    pub fn outcome(&self, step: &str) -> Option<&StepOutcome<E>> {
        self.records
            .iter()
            .find(|r| r.name == step)
            .map(|r| &r.outcome)
    }

    /// Output of a successful step
    #[must_use]
    pub fn output<T: Any + Send + Sync>(&self, step: &str) -> Option<Arc<T>> {
        self.outputs
            .get(step)
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }

    /// Whether every step succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.records.iter().all(|r| r.outcome.is_success())
    }

    /// Failed steps with their errors
    pub fn failures(&self) -> impl Iterator<Item = (&str, &E)> {
        self.records.iter().filter_map(|r| match &r.outcome {
            StepOutcome::Failed(e) => Some((r.name.as_str(), e)),
            _ => None,
        })
    }

    /// First failure in execution order
    #[must_use]
    pub fn first_failure(&self) -> Option<(&str, &E)> {
        self.failures().next()
    }

    /// Skipped steps with the failure that caused them
    pub fn skipped(&self) -> impl Iterator<Item = (&str, &str)> {
        self.records.iter().filter_map(|r| match &r.outcome {
            StepOutcome::Skipped { caused_by } => Some((r.name.as_str(), caused_by.as_str())),
            _ => None,
        })
    }

    /// Consume the report, keeping only failed steps and their errors
    pub fn into_failures(self) -> Vec<(String, E)> {
        self.records
            .into_iter()
            .filter_map(|r| match r.outcome {
                StepOutcome::Failed(e) => Some((r.name, e)),
                _ => None,
            })
            .collect()
    }
}

impl<E: std::fmt::Display> StepReport<E> {
    /// Serializable summary of the run
    #[must_use]
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            pipeline: self.pipeline.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            succeeded: self.is_success(),
            steps: self
                .records
                .iter()
                .map(|r| StepSummary {
                    name: r.name.clone(),
                    status: r.outcome.label().to_string(),
                    error: match &r.outcome {
                        StepOutcome::Failed(e) => Some(e.to_string()),
                        _ => None,
                    },
                    caused_by: match &r.outcome {
                        StepOutcome::Skipped { caused_by } => Some(caused_by.clone()),
                        _ => None,
                    },
                    started_at: r.started_at,
                    elapsed_ms: u64::try_from(r.elapsed.as_millis()).unwrap_or(u64::MAX),
                })
                .collect(),
        }
    }
}

/// Serializable view of a [`StepReport`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Pipeline name
    pub pipeline: String,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: DateTime<Utc>,
    /// Whether every step succeeded
    pub succeeded: bool,
    /// Steps in execution order
    pub steps: Vec<StepSummary>,
}

/// Serializable view of a [`StepRecord`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    /// Step name
    pub name: String,
    /// `success`, `failed` or `skipped`
    pub status: String,
    /// Error message of a failed step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Root failure of a skipped step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<String>,
    /// Step start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Wall time in milliseconds
    pub elapsed_ms: u64,
}
