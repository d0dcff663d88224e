//! Step pipelines
//!
//! A pipeline is a set of named steps, each declaring the steps it depends
//! on. Construction validates the dependency graph once; execution then runs
//! steps strictly one at a time in a stable topological order (among ready
//! steps, the one declared first runs first).
//!
//! A step whose dependency did not succeed is never started. It is recorded
//! as [`StepOutcome::Skipped`] naming the failure at the root of the chain.
//! Steps on independent branches still run.
//!
//! ```rust,ignore
//! let pipeline = PipelineBuilder::new("extract")
//!     .add(StepSpec::new("stage", |_| async { Ok::<_, MyError>(staged_path) }))
//!     .add(StepSpec::new("run", |inputs: StepInputs| async move {
//!         let path = inputs.get::<PathBuf>("stage")?;
//!         run_worker(path).await
//!     }).after(&["stage"]).timeout(Duration::from_secs(600)))
//!     .build()?;
//! let report = pipeline.execute().await?;
//! ```

mod executor;
mod report;

pub use report::{ReportSummary, StepOutcome, StepRecord, StepReport, StepSummary};

use crate::error::PipelineError;
use petgraph::graphmap::DiGraphMap;
use std::any::Any;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Output of a successful step, shared with dependants
pub type StepValue = Arc<dyn Any + Send + Sync>;

type StepFuture<E> = Pin<Box<dyn Future<Output = Result<StepValue, E>> + Send>>;
type StepFn<E> = Arc<dyn Fn(StepInputs) -> StepFuture<E> + Send + Sync>;

/// Outputs of a step's declared dependencies
#[derive(Clone, Default)]
pub struct StepInputs {
    values: HashMap<String, StepValue>,
}

impl StepInputs {
    /// Borrow the output of dependency `step` as a `T`
    pub fn get<T: Any + Send + Sync>(&self, step: &str) -> Result<&T, PipelineError> {
        self.values
            .get(step)
            .ok_or_else(|| PipelineError::MissingInput(step.to_string()))?
            .downcast_ref::<T>()
            .ok_or_else(|| PipelineError::TypeMismatch {
                step: step.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Names of the dependencies available
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for StepInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepInputs")
            .field("steps", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Declaration of one step
pub struct StepSpec<E> {
    name: String,
    depends_on: Vec<String>,
    timeout: Option<Duration>,
    run: StepFn<E>,
}

impl<E: Send + 'static> StepSpec<E> {
    /// Declare a step running `f`
    ///
    /// `f` receives the outputs of the declared dependencies and may be
    /// invoked again if the pipeline is executed more than once.
    pub fn new<F, Fut, T>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepInputs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Any + Send + Sync,
    {
        let run: StepFn<E> = Arc::new(move |inputs| -> StepFuture<E> {
            let fut = f(inputs);
            Box::pin(async move { fut.await.map(|value| Arc::new(value) as StepValue) })
        });
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            timeout: None,
            run,
        }
    }

    /// Declare dependencies
    #[inline]
    #[must_use]
    pub fn after(mut self, steps: &[&str]) -> Self {
        self.depends_on
            .extend(steps.iter().map(|s| (*s).to_string()));
        self
    }

    /// Bound the step's run time
    #[inline]
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Step name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Collects step declarations before validation
pub struct PipelineBuilder<E> {
    name: String,
    steps: Vec<StepSpec<E>>,
}

impl<E: Send + 'static> PipelineBuilder<E> {
    /// Start an empty pipeline
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step
    #[must_use]
    pub fn add(mut self, step: StepSpec<E>) -> Self {
        self.steps.push(step);
        self
    }

    /// Validate the dependency graph and fix the execution order
    pub fn build(self) -> Result<Pipeline<E>, PipelineError> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(self.steps.len());
        for (i, step) in self.steps.iter().enumerate() {
            if index.insert(step.name.as_str(), i).is_some() {
                return Err(PipelineError::DuplicateStep(step.name.clone()));
            }
        }

        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        let mut dependencies = Vec::with_capacity(self.steps.len());
        for (i, step) in self.steps.iter().enumerate() {
            graph.add_node(i);
            let mut deps = Vec::with_capacity(step.depends_on.len());
            for dep in &step.depends_on {
                if dep == &step.name {
                    return Err(PipelineError::SelfDependency(step.name.clone()));
                }
                let &d = index
                    .get(dep.as_str())
                    .ok_or_else(|| PipelineError::UnknownDependency {
                        step: step.name.clone(),
                        dependency: dep.clone(),
                    })?;
                graph.add_edge(d, i, ());
                if !deps.contains(&d) {
                    deps.push(d);
                }
            }
            dependencies.push(deps);
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(PipelineError::CycleDetected(self.name));
        }

        let order = stable_order(&graph, self.steps.len());
        Ok(Pipeline {
            name: self.name,
            steps: self.steps,
            dependencies,
            order,
        })
    }
}

/// Kahn's algorithm, always picking the earliest-declared ready step
fn stable_order(graph: &DiGraphMap<usize, ()>, count: usize) -> Vec<usize> {
    let mut pending: Vec<usize> = (0..count)
        .map(|i| {
            graph
                .neighbors_directed(i, petgraph::Direction::Incoming)
                .count()
        })
        .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = pending
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(count);
    while let Some(Reverse(next)) = ready.pop() {
        order.push(next);
        for succ in graph.neighbors_directed(next, petgraph::Direction::Outgoing) {
            pending[succ] -= 1;
            if pending[succ] == 0 {
                ready.push(Reverse(succ));
            }
        }
    }
    order
}

/// A validated pipeline
pub struct Pipeline<E> {
    name: String,
    steps: Vec<StepSpec<E>>,
    dependencies: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl<E> Pipeline<E> {
    /// Pipeline name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Step names in execution order
    #[must_use]
    pub fn execution_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.steps[i].name.as_str())
            .collect()
    }
}

impl<E> std::fmt::Debug for Pipeline<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("order", &self.execution_order())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    fn noop(name: &str) -> StepSpec<Boom> {
        StepSpec::new(name, |_| async { Ok::<_, Boom>(()) })
    }

    #[test]
    fn order_prefers_declaration_among_ready_steps() {
        let pipeline = PipelineBuilder::new("p")
            .add(noop("c").after(&["a"]))
            .add(noop("a"))
            .add(noop("b"))
            .add(noop("d").after(&["c", "b"]))
            .build()
            .unwrap();
        assert_eq!(pipeline.execution_order(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn rejects_duplicates_and_unknown_dependencies() {
        let dup = PipelineBuilder::new("p").add(noop("a")).add(noop("a")).build();
        assert_eq!(dup.unwrap_err(), PipelineError::DuplicateStep("a".into()));

        let unknown = PipelineBuilder::new("p")
            .add(noop("a").after(&["ghost"]))
            .build();
        assert!(matches!(
            unknown.unwrap_err(),
            PipelineError::UnknownDependency { dependency, .. } if dependency == "ghost"
        ));

        let selfish = PipelineBuilder::new("p").add(noop("a").after(&["a"])).build();
        assert_eq!(selfish.unwrap_err(), PipelineError::SelfDependency("a".into()));
    }

    #[test]
    fn rejects_cycles() {
        let cyclic = PipelineBuilder::new("loop")
            .add(noop("a").after(&["c"]))
            .add(noop("b").after(&["a"]))
            .add(noop("c").after(&["b"]))
            .build();
        assert_eq!(cyclic.unwrap_err(), PipelineError::CycleDetected("loop".into()));
    }

    #[test]
    fn inputs_report_type_mismatch() {
        let mut values: HashMap<String, StepValue> = HashMap::new();
        values.insert("a".into(), Arc::new(5_u32));
        let inputs = StepInputs { values };

        assert_eq!(*inputs.get::<u32>("a").unwrap(), 5);
        assert!(matches!(
            inputs.get::<String>("a"),
            Err(PipelineError::TypeMismatch { .. })
        ));
        assert!(matches!(
            inputs.get::<u32>("b"),
            Err(PipelineError::MissingInput(_))
        ));
    }
}
