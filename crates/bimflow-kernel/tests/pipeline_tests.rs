use bimflow_kernel::{
    PipelineBuilder, PipelineError, StepInputs, StepOutcome, StepSpec, StepTimedOut,
};
use support::Log;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
enum TestError {
    #[error("step failed: {0}")]
    Failed(&'static str),
    #[error(transparent)]
    Timeout(#[from] StepTimedOut),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

mod support {
    use std::sync::{Arc, Mutex};

    /// Shared execution log
    #[derive(Clone, Default)]
    pub struct Log(Arc<Mutex<Vec<String>>>);

    impl Log {
        pub fn push(&self, entry: &str) {
            self.0.lock().unwrap().push(entry.to_string());
        }

        pub fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }
}

fn logged(log: &Log, name: &'static str, fail: bool) -> StepSpec<TestError> {
    let log = log.clone();
    StepSpec::new(name, move |_| {
        let log = log.clone();
        async move {
            log.push(name);
            if fail {
                Err(TestError::Failed(name))
            } else {
                Ok(name)
            }
        }
    })
}

#[tokio::test]
async fn test_failure_skips_dependents_but_not_siblings() {
    let log = Log::default();
    let pipeline = PipelineBuilder::new("round-trip")
        .add(logged(&log, "a", false))
        .add(logged(&log, "b", true).after(&["a"]))
        .add(logged(&log, "c", false).after(&["b"]))
        .add(logged(&log, "d", false).after(&["a"]))
        .add(logged(&log, "e", false).after(&["c", "d"]))
        .build()
        .unwrap();

    let report = pipeline.execute().await.unwrap();

    assert_eq!(log.entries(), vec!["a", "b", "d"]);
    assert!(report.outcome("a").unwrap().is_success());
    assert!(matches!(
        report.outcome("b"),
        Some(StepOutcome::Failed(TestError::Failed("b")))
    ));
    assert!(report.outcome("d").unwrap().is_success());
    assert_eq!(
        report.skipped().collect::<Vec<_>>(),
        vec![("c", "b"), ("e", "b")]
    );
    assert!(!report.is_success());
    assert_eq!(report.first_failure().map(|(n, _)| n), Some("b"));
}

#[tokio::test]
async fn test_outputs_flow_to_dependants() {
    let pipeline = PipelineBuilder::new("sum")
        .add(StepSpec::new("two", |_| async { Ok::<_, TestError>(2_u64) }))
        .add(StepSpec::new("three", |_| async { Ok::<_, TestError>(3_u64) }))
        .add(
            StepSpec::new("sum", |inputs: StepInputs| async move {
                let a = *inputs.get::<u64>("two")?;
                let b = *inputs.get::<u64>("three")?;
                Ok::<_, TestError>(a + b)
            })
            .after(&["two", "three"]),
        )
        .build()
        .unwrap();

    let report = pipeline.execute().await.unwrap();
    assert_eq!(report.output::<u64>("sum").as_deref(), Some(&5));
    assert!(report.output::<String>("sum").is_none());
}

#[tokio::test]
async fn test_inputs_only_expose_declared_dependencies() {
    let pipeline = PipelineBuilder::new("scoped")
        .add(StepSpec::new("secret", |_| async { Ok::<_, TestError>(1_u8) }))
        .add(StepSpec::new("public", |_| async { Ok::<_, TestError>(2_u8) }))
        .add(
            StepSpec::new("reader", |inputs: StepInputs| async move {
                Ok::<_, TestError>(*inputs.get::<u8>("secret")?)
            })
            .after(&["public"]),
        )
        .build()
        .unwrap();

    let report = pipeline.execute().await.unwrap();
    assert!(matches!(
        report.outcome("reader"),
        Some(StepOutcome::Failed(TestError::Pipeline(
            PipelineError::MissingInput(_)
        )))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout_fails_step() {
    let pipeline = PipelineBuilder::new("slow")
        .add(
            StepSpec::new("hang", |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, TestError>(())
            })
            .timeout(Duration::from_millis(50)),
        )
        .add(StepSpec::new("after", |_| async { Ok::<_, TestError>(()) }).after(&["hang"]))
        .build()
        .unwrap();

    let report = pipeline.execute().await.unwrap();
    match report.outcome("hang") {
        Some(StepOutcome::Failed(TestError::Timeout(t))) => {
            assert_eq!(t.step, "hang");
            assert_eq!(t.after, Duration::from_millis(50));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(report.skipped().collect::<Vec<_>>(), vec![("after", "hang")]);
}

#[tokio::test]
async fn test_summary_serializes_statuses() {
    let log = Log::default();
    let pipeline = PipelineBuilder::new("summary")
        .add(logged(&log, "x", true))
        .add(logged(&log, "y", false).after(&["x"]))
        .build()
        .unwrap();

    let summary = pipeline.execute().await.unwrap().summary();
    assert!(!summary.succeeded);
    assert_eq!(summary.steps[0].status, "failed");
    assert_eq!(summary.steps[0].error.as_deref(), Some("step failed: x"));
    assert_eq!(summary.steps[1].status, "skipped");
    assert_eq!(summary.steps[1].caused_by.as_deref(), Some("x"));

    let json = serde_json::to_string(&summary).unwrap();
    let back: bimflow_kernel::ReportSummary = serde_json::from_str(&json).unwrap();
    assert_eq!(back, summary);
}

proptest! {
    #[test]
    fn prop_order_respects_dependencies(
        count in 1..12usize,
        edges in proptest::collection::vec((0..12usize, 0..12usize), 0..30)
    ) {
        let names: Vec<String> = (0..count).map(|i| format!("s{i}")).collect();
        let mut deps: Vec<Vec<&str>> = vec![Vec::new(); count];
        for (a, b) in edges {
            let (a, b) = (a % count, b % count);
            // only backward edges, so the graph is acyclic
            if a < b {
                deps[b].push(names[a].as_str());
            }
        }

        let mut builder = PipelineBuilder::<TestError>::new("prop");
        for (i, name) in names.iter().enumerate() {
            builder = builder.add(
                StepSpec::new(name.clone(), |_| async { Ok::<_, TestError>(()) }).after(&deps[i]),
            );
        }
        let pipeline = builder.build().unwrap();
        let order = pipeline.execution_order();

        prop_assert_eq!(order.len(), count);
        for (i, name) in names.iter().enumerate() {
            let pos = order.iter().position(|n| *n == name.as_str()).unwrap();
            for dep in &deps[i] {
                let dep_pos = order.iter().position(|n| n == dep).unwrap();
                prop_assert!(dep_pos < pos);
            }
        }
    }

    #[test]
    fn prop_cycles_are_rejected(count in 2..8usize) {
        let names: Vec<String> = (0..count).map(|i| format!("s{i}")).collect();
        let mut builder = PipelineBuilder::<TestError>::new("ring");
        for i in 0..count {
            let prev = names[(i + count - 1) % count].as_str();
            builder = builder.add(
                StepSpec::new(names[i].clone(), |_| async { Ok::<_, TestError>(()) }).after(&[prev]),
            );
        }
        prop_assert_eq!(
            builder.build().unwrap_err(),
            PipelineError::CycleDetected("ring".into())
        );
    }
}
