//! Sequential pipeline execution

use super::report::{StepOutcome, StepRecord, StepReport};
use super::{Pipeline, StepInputs};
use crate::error::{PipelineError, StepTimedOut};
use chrono::Utc;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

impl<E> Pipeline<E>
where
    E: std::fmt::Display + From<StepTimedOut> + Send + 'static,
{
    /// Run every step once, in execution order
    ///
    /// Step failures are captured in the report. An `Err` is returned only
    /// when the report itself cannot be assembled.
    pub async fn execute(&self) -> Result<StepReport<E>, PipelineError> {
        let started_at = Utc::now();
        info!(pipeline = %self.name, steps = self.steps.len(), "pipeline started");

        let mut records: Vec<StepRecord<E>> = Vec::with_capacity(self.steps.len());
        let mut outputs = HashMap::new();
        // index -> root failure for steps that did not succeed
        let mut blocked: HashMap<usize, String> = HashMap::new();

        for &idx in &self.order {
            let step = &self.steps[idx];

            if let Some(root) = self.dependencies[idx]
                .iter()
                .find_map(|d| blocked.get(d))
                .cloned()
            {
                debug!(pipeline = %self.name, step = %step.name, caused_by = %root, "step skipped");
                blocked.insert(idx, root.clone());
                records.push(StepRecord {
                    name: step.name.clone(),
                    outcome: StepOutcome::Skipped { caused_by: root },
                    started_at: None,
                    elapsed: std::time::Duration::ZERO,
                });
                continue;
            }

            let mut values = HashMap::with_capacity(self.dependencies[idx].len());
            for &dep in &self.dependencies[idx] {
                let name = &self.steps[dep].name;
                let value = outputs
                    .get(name)
                    .cloned()
                    .ok_or_else(|| PipelineError::MissingInput(name.clone()))?;
                values.insert(name.clone(), value);
            }

            info!(pipeline = %self.name, step = %step.name, "step started");
            let step_started = Utc::now();
            let clock = Instant::now();
            let fut = (step.run)(StepInputs { values });
            let result = match step.timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(E::from(StepTimedOut {
                        step: step.name.clone(),
                        after: limit,
                    })),
                },
                None => fut.await,
            };
            let elapsed = clock.elapsed();

            let outcome = match result {
                Ok(value) => {
                    info!(
                        pipeline = %self.name,
                        step = %step.name,
                        elapsed = ?elapsed,
                        "step succeeded"
                    );
                    outputs.insert(step.name.clone(), value);
                    StepOutcome::Success
                }
                Err(err) => {
                    warn!(
                        pipeline = %self.name,
                        step = %step.name,
                        elapsed = ?elapsed,
                        error = %err,
                        "step failed"
                    );
                    blocked.insert(idx, step.name.clone());
                    StepOutcome::Failed(err)
                }
            };
            records.push(StepRecord {
                name: step.name.clone(),
                outcome,
                started_at: Some(step_started),
                elapsed,
            });
        }

        let report = StepReport {
            pipeline: self.name.clone(),
            started_at,
            finished_at: Utc::now(),
            records,
            outputs,
        };
        info!(
            pipeline = %self.name,
            succeeded = report.is_success(),
            failed = report.failures().count(),
            skipped = report.skipped().count(),
            "pipeline finished"
        );
        Ok(report)
    }
}
