use bimflow_kernel::SessionState::{
    self, AwaitingReady, Closing, Connected, Disconnected, Driving, Launching,
};
use bimflow_model::AnalysisSettings;
use bimflow_test_utils::{minimal_model, results_with, ScriptedConnector};
use bimflow_worker::{InstallationLease, SessionConfig, SessionController, SessionError};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn config(installation: &str) -> SessionConfig {
    SessionConfig::default()
        .without_engine(installation)
        .with_ready_delay(Duration::from_secs(1))
        .with_attach_retries(4, Duration::from_millis(100), Duration::from_millis(400))
        .with_analysis_timeout(Duration::from_secs(1), Duration::from_secs(30))
}

fn controller(installation: &str, connector: &ScriptedConnector) -> SessionController {
    SessionController::new(
        config(installation),
        Arc::new(connector.clone()),
        std::env::temp_dir(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_analysis_walks_the_full_lifecycle() {
    let connector =
        ScriptedConnector::returning(results_with(&[(10, 4.2)], &[(10, 100)])).analyzing_for(3);
    let mut session = controller("/opt/engine/full-lifecycle", &connector);

    let results = session
        .analyze(&minimal_model(), &AnalysisSettings::default())
        .await
        .unwrap();

    assert_eq!(results, results_with(&[(10, 4.2)], &[(10, 100)]));
    assert_eq!(connector.calls(), vec!["attach", "load", "analyze", "results", "close"]);
    let expected: Vec<SessionState> = vec![
        Disconnected, Launching, AwaitingReady, Connected, Driving, Connected, Driving,
        Connected, Driving, Connected, Closing, Disconnected,
    ];
    assert_eq!(session.history(), expected.as_slice());
}

#[tokio::test(start_paused = true)]
async fn test_attach_retries_until_the_engine_is_ready() {
    let connector = ScriptedConnector::default().failing_attaches(2);
    let mut session = controller("/opt/engine/retry", &connector);

    session.open().await.unwrap();
    assert_eq!(session.state(), Connected);
    assert_eq!(connector.attach_count(), 3);
    session.close().await;
    assert_eq!(session.state(), Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_attach_budget_closes_the_session() {
    let installation = "/opt/engine/exhausted";
    let connector = ScriptedConnector::default().failing_attaches(100);
    let mut session = controller(installation, &connector);

    let err = session.open().await.unwrap_err();
    match &err {
        SessionError::ConnectFailure { attempts, last_error } => {
            assert_eq!(*attempts, 4);
            assert!(last_error.contains("not ready (4)"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());
    assert_eq!(connector.attach_count(), 4);
    assert_eq!(session.state(), Disconnected);
    assert_eq!(session.history().last(), Some(&Disconnected));
    assert!(!InstallationLease::is_held(&PathBuf::from(installation)));
}

#[tokio::test(start_paused = true)]
async fn test_busy_installation_is_refused_without_launching() {
    let installation = "/opt/engine/busy";
    let _held = InstallationLease::acquire(installation).unwrap();
    let connector = ScriptedConnector::default();
    let mut session = controller(installation, &connector);

    let err = session
        .analyze(&minimal_model(), &AnalysisSettings::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Busy(_)));
    assert_eq!(connector.attach_count(), 0);
    assert_eq!(session.history(), &[Disconnected]);
}

#[tokio::test(start_paused = true)]
async fn test_analysis_timeout_still_closes() {
    let connector = ScriptedConnector::default().analyzing_for(u32::MAX);
    let mut session = controller("/opt/engine/slow-analysis", &connector);

    let err = session
        .analyze(&minimal_model(), &AnalysisSettings::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::AnalysisTimeout { after } if after == Duration::from_secs(30)));
    assert_eq!(connector.calls().last().map(String::as_str), Some("close"));
    assert_eq!(session.state(), Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_budget_detaches_a_hung_engine() {
    let installation = "/opt/engine/hung-dialog";
    let connector = ScriptedConnector::default().analyzing_for(u32::MAX);
    let mut session = controller(installation, &connector);

    let outcome = session
        .analyze_within(&minimal_model(), &AnalysisSettings::default(), Duration::from_secs(5))
        .await;
    assert!(outcome.is_none());
    assert_eq!(connector.calls(), vec!["attach", "load", "analyze", "close"]);
    assert_eq!(&session.history()[session.history().len() - 3..], &[Driving, Closing, Disconnected]);
    assert!(!InstallationLease::is_held(&PathBuf::from(installation)));
}

#[tokio::test(start_paused = true)]
async fn test_engine_operation_failure_closes_and_releases() {
    let installation = "/opt/engine/load-failure";
    let connector = ScriptedConnector::default().failing_on("load");
    let mut session = controller(installation, &connector);

    let err = session
        .analyze(&minimal_model(), &AnalysisSettings::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("scripted failure"));
    assert_eq!(connector.calls(), vec!["attach", "load", "close"]);
    assert!(!InstallationLease::is_held(&PathBuf::from(installation)));

    // a fresh session on the same installation can proceed
    let retry = ScriptedConnector::default();
    let mut again = controller(installation, &retry);
    assert!(again.analyze(&minimal_model(), &AnalysisSettings::default()).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_driving_requires_an_open_session() {
    let connector = ScriptedConnector::default();
    let mut session = controller("/opt/engine/not-open", &connector);

    let err = session.run_analysis().await.unwrap_err();
    assert!(matches!(err, SessionError::State(_)));
    assert_eq!(session.state(), Disconnected);
}

#[cfg(unix)]
#[tokio::test]
async fn test_engine_exit_during_attach_is_reported() {
    let work = tempfile::tempdir().unwrap();
    let connector = ScriptedConnector::default().failing_attaches(100);
    let config = SessionConfig::default()
        .with_engine(bimflow_test_utils::sh_worker("exit 4"))
        .with_ready_delay(Duration::from_millis(300))
        .with_attach_retries(10, Duration::from_millis(50), Duration::from_millis(50));
    let mut session = SessionController::new(config, Arc::new(connector.clone()), work.path());

    let err = session.open().await.unwrap_err();
    assert!(matches!(err, SessionError::EngineExited { status: Some(4) }), "{err}");
    assert_eq!(connector.attach_count(), 0);
    assert_eq!(session.state(), Disconnected);
}

#[cfg(unix)]
const BRIDGE: &str = r#"
case "$1" in
  attach) exit 0 ;;
  load) test -f "$BIMFLOW_ANALYSIS_INPUT" || exit 3 ;;
  analyze) echo analyzing ;;
  results) printf '{"loadCase":1,"memberDisplacements":{"10":3.5}}' > "$BIMFLOW_ANALYSIS_OUT/engine_results_1.json" ;;
  close) exit 0 ;;
  *) exit 9 ;;
esac
"#;

#[cfg(unix)]
#[tokio::test]
async fn test_bridge_drives_the_engine_through_the_job_directory() {
    use bimflow_test_utils::{fast_launcher, sh_worker, temp_store};
    use bimflow_worker::{BridgeConnector, ProcessLauncher};

    let (_dir, store) = temp_store();
    let job = store.create_job().await.unwrap();
    let launcher = ProcessLauncher::new(fast_launcher(), Arc::clone(&store));
    let connector = BridgeConnector::new(
        sh_worker(BRIDGE).with_arg("{op}"),
        Arc::clone(&store),
        job,
        launcher,
    );
    let config = SessionConfig::default()
        .without_engine("/opt/engine/bridge-happy")
        .with_ready_delay(Duration::ZERO);
    let mut session = SessionController::new(config, Arc::new(connector), store.job_dir(&job));

    let results = session
        .analyze(&minimal_model(), &AnalysisSettings::default())
        .await
        .unwrap();
    assert_eq!(results, results_with(&[(10, 3.5)], &[]));

    let staged: serde_json::Value = serde_json::from_slice(
        &std::fs::read(store.job_dir(&job).join("analysis_input.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(staged["model"]["members"][0]["id"], 10);
    assert_eq!(staged["settings"]["allowableDeformationMm"], 10.0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_bridge_attach_failure_is_retried_then_reported() {
    use bimflow_test_utils::{fast_launcher, sh_worker, temp_store};
    use bimflow_worker::{BridgeConnector, ProcessLauncher};

    let (_dir, store) = temp_store();
    let job = store.create_job().await.unwrap();
    let launcher = ProcessLauncher::new(fast_launcher(), Arc::clone(&store));
    let connector = BridgeConnector::new(
        sh_worker("echo 'engine still starting' >&2; exit 1"),
        Arc::clone(&store),
        job,
        launcher,
    );
    let config = SessionConfig::default()
        .without_engine("/opt/engine/bridge-unavailable")
        .with_ready_delay(Duration::ZERO)
        .with_attach_retries(3, Duration::from_millis(10), Duration::from_millis(20));
    let mut session = SessionController::new(config, Arc::new(connector), store.job_dir(&job));

    match session.open().await.unwrap_err() {
        SessionError::ConnectFailure { attempts, last_error } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("engine still starting"), "{last_error}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.state(), Disconnected);
}
