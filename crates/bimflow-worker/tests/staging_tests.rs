use bimflow_test_utils::temp_store;
use bimflow_worker::{ArtifactPattern, StagingError};
use pretty_assertions::assert_eq;
use std::fs::File;
use std::path::Path;
use std::time::{Duration, SystemTime};

fn touch(path: &Path, age: Duration) {
    std::fs::write(path, b"{}").unwrap();
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

#[tokio::test]
async fn test_newest_artifact_wins_by_modification_time() {
    let (_dir, store) = temp_store();
    let job = store.create_job().await.unwrap();
    let dir = store.job_dir(&job);
    touch(&dir.join("b_export.json"), Duration::from_secs(600));
    touch(&dir.join("a_export.json"), Duration::from_secs(60));
    touch(&dir.join("notes.txt"), Duration::ZERO);

    let pattern = ArtifactPattern::new("*.json").unwrap();
    let found = store.discover_newest(&job, &pattern).await.unwrap();
    assert_eq!(found.name, "a_export.json");

    let since = SystemTime::now() - Duration::from_secs(30);
    assert!(matches!(
        store.discover_newest_since(&job, &pattern, since).await,
        Err(StagingError::ArtifactNotFound { .. })
    ));
}

#[tokio::test]
async fn test_staged_inputs_are_never_overwritten() {
    let (_dir, store) = temp_store();
    let job = store.create_job().await.unwrap();

    let path = store.stage(&job, "tower.rvt", b"v1").await.unwrap();
    let again = store.stage(&job, "tower.rvt", b"v2").await;
    assert!(matches!(again, Err(StagingError::AlreadyStaged(p)) if p == path));
    assert_eq!(store.read(&path).await.unwrap(), b"v1");
}

#[tokio::test]
async fn test_exact_lookup_reports_missing_artifacts() {
    let (_dir, store) = temp_store();
    let job = store.create_job().await.unwrap();

    let err = store.discover_by_exact_name(&job, "input.json").await.unwrap_err();
    match err {
        StagingError::ArtifactNotFound { pattern, dir } => {
            assert_eq!(pattern, "input.json");
            assert_eq!(dir, store.job_dir(&job));
        }
        other => panic!("unexpected error: {other}"),
    }

    store.write(&job, "input.json", b"{}").await.unwrap();
    assert!(store.discover_by_exact_name(&job, "input.json").await.is_ok());
}

#[tokio::test]
async fn test_artifact_names_cannot_escape_the_job() {
    let (_dir, store) = temp_store();
    let job = store.create_job().await.unwrap();

    for name in ["../other.json", "a/b.json", "..", ""] {
        assert!(matches!(
            store.write(&job, name, b"x").await,
            Err(StagingError::InvalidName(_))
        ));
    }
}

#[tokio::test]
async fn test_jobs_do_not_see_each_other() {
    let (_dir, store) = temp_store();
    let a = store.create_job().await.unwrap();
    let b = store.create_job().await.unwrap();
    store.write(&a, "export.json", b"{}").await.unwrap();

    let pattern = ArtifactPattern::new("*.json").unwrap();
    assert!(store.discover_newest(&a, &pattern).await.is_ok());
    assert!(store.snapshot(&b, &pattern).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_promote_keeps_extension_and_reports_go_in_subdirectory() {
    let (_dir, store) = temp_store();
    let job = store.create_job().await.unwrap();
    let source = store.write(&job, "Tower_saved.RVT", b"model").await.unwrap();

    let promoted = store.promote(&job, &source, "updated_model").await.unwrap();
    assert_eq!(promoted, store.job_dir(&job).join("updated_model.RVT"));
    assert_eq!(store.read(&promoted).await.unwrap(), b"model");
    assert_eq!(store.promote(&job, &promoted, "updated_model").await.unwrap(), promoted);

    let report = store.write_report(&job, "update.json", b"{}").await.unwrap();
    assert_eq!(report, store.job_dir(&job).join("reports").join("update.json"));
}

#[tokio::test]
async fn test_pointer_names_the_raw_file() {
    let (_dir, store) = temp_store();
    let job = store.create_job().await.unwrap();
    let raw = store.job_dir(&job).join("export_20240101.json");

    let pointer = store.write_pointer(&job, &raw).await.unwrap();
    let text = String::from_utf8(store.read(&pointer).await.unwrap()).unwrap();
    assert_eq!(text.trim_end(), raw.display().to_string());
}
