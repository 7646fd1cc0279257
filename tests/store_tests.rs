use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use bench_worker::properties::Properties;
use bench_worker::scheduler::{JobRecord, JobState};
use bench_worker::store::{JobStore, StoreError, CONFIG_FILE, RECORD_FILE};

async fn open_store() -> (JobStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = JobStore::open(dir.path().join("jobs")).await.unwrap();
    (store, dir)
}

fn finished_record(id: &str) -> JobRecord {
    JobRecord {
        id: id.to_string(),
        state: JobState::Finished,
        started_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
        finished_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap()),
        workload: "core".to_string(),
        database: "memory".to_string(),
        error: None,
    }
}

#[tokio::test]
async fn test_open_creates_root() {
    let (store, _dir) = open_store().await;
    assert!(store.root().is_dir());
}

#[tokio::test]
async fn test_record_roundtrip() {
    let (store, _dir) = open_store().await;
    let record = finished_record("bench1");

    store.create("bench1").await.unwrap();
    store.save(&record).await.unwrap();
    assert!(store.exists("bench1").await);
    assert_eq!(store.load("bench1").await.unwrap(), record);

    let error_record = JobRecord {
        state: JobState::Error,
        error: Some("database error: boom".to_string()),
        ..record
    };
    store.save(&error_record).await.unwrap();
    assert_eq!(store.load("bench1").await.unwrap(), error_record);
}

#[tokio::test]
async fn test_record_uses_symbolic_state_names() {
    let (store, _dir) = open_store().await;
    store.save(&finished_record("sym")).await.unwrap();

    let raw = std::fs::read_to_string(store.job_dir("sym").join(RECORD_FILE)).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["state"], "finished");
    assert_eq!(value["schema_version"], 1);
    assert_eq!(value["id"], "sym");
}

#[tokio::test]
async fn test_missing_record_is_not_found() {
    let (store, _dir) = open_store().await;
    assert!(!store.exists("ghost").await);
    assert!(matches!(
        store.load("ghost").await,
        Err(StoreError::NotFound(ref id)) if id == "ghost"
    ));
}

#[tokio::test]
async fn test_create_refuses_existing_record() {
    let (store, _dir) = open_store().await;
    store.create("one").await.unwrap();
    // Directory without a record can be reused
    store.create("one").await.unwrap();

    store.save(&finished_record("one")).await.unwrap();
    assert!(matches!(
        store.create("one").await,
        Err(StoreError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn test_unknown_state_is_corrupt() {
    let (store, _dir) = open_store().await;
    let dir = store.create("odd").await.unwrap();
    std::fs::write(
        dir.join(RECORD_FILE),
        r#"{"schema_version":1,"id":"odd","state":"paused","started_at":null,"finished_at":null,"workload":"core","database":"memory"}"#,
    )
    .unwrap();

    assert!(matches!(
        store.load("odd").await,
        Err(StoreError::Corrupt { .. })
    ));
}

#[tokio::test]
async fn test_future_schema_version_is_corrupt() {
    let (store, _dir) = open_store().await;
    let dir = store.create("next").await.unwrap();
    std::fs::write(
        dir.join(RECORD_FILE),
        r#"{"schema_version":2,"id":"next","state":"initialized","started_at":null,"finished_at":null,"workload":"core","database":"memory"}"#,
    )
    .unwrap();

    let err = store.load("next").await.unwrap_err();
    assert!(err.to_string().contains("schema version 2"));
}

#[tokio::test]
async fn test_record_for_other_job_is_corrupt() {
    let (store, _dir) = open_store().await;
    store.save(&finished_record("a")).await.unwrap();
    std::fs::create_dir_all(store.job_dir("b")).unwrap();
    std::fs::copy(
        store.job_dir("a").join(RECORD_FILE),
        store.job_dir("b").join(RECORD_FILE),
    )
    .unwrap();

    assert!(matches!(
        store.load("b").await,
        Err(StoreError::Corrupt { .. })
    ));
}

#[tokio::test]
async fn test_configuration_roundtrip() {
    let (store, _dir) = open_store().await;
    let config = Properties::new()
        .with("recordcount", "500")
        .with("table", "user table")
        .with("path", "C:\\data=x");

    store.save_configuration("cfg", &config).await.unwrap();
    assert!(store.job_dir("cfg").join(CONFIG_FILE).is_file());
    assert_eq!(store.load_configuration("cfg").await.unwrap(), config);

    // Records without a configuration file read back as empty
    assert!(store.load_configuration("none").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_saves_leave_no_temp_files() {
    let (store, _dir) = open_store().await;
    for _ in 0..3 {
        store.save(&finished_record("tidy")).await.unwrap();
    }
    store
        .save_configuration("tidy", &Properties::new().with("a", "1"))
        .await
        .unwrap();

    let mut names: Vec<String> = std::fs::read_dir(store.job_dir("tidy"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec![CONFIG_FILE.to_string(), RECORD_FILE.to_string()]);
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let (store, _dir) = open_store().await;
    store.save(&finished_record("gone")).await.unwrap();
    store.remove("gone").await.unwrap();
    assert!(!store.exists("gone").await);
    store.remove("gone").await.unwrap();
}

#[tokio::test]
async fn test_open_artifact_in_subdirectory() {
    let (store, _dir) = open_store().await;
    let dir = store.create("nested").await.unwrap();
    std::fs::create_dir_all(dir.join("out")).unwrap();
    std::fs::write(dir.join("out/latency.csv"), "p50,p99\n1,9\n").unwrap();

    let artifact = store.open_artifact("nested", "out/latency.csv").await.unwrap();
    assert_eq!(artifact.key, "out/latency.csv");
    assert_eq!(artifact.len, 12);

    // Directories are not artifacts
    assert!(matches!(
        store.open_artifact("nested", "out").await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_open_artifact_rejects_traversal() {
    let (store, _dir) = open_store().await;
    store.save(&finished_record("a")).await.unwrap();
    store.save(&finished_record("b")).await.unwrap();

    for key in ["../b/job.json", "/etc/passwd", "x/../../b/job.json"] {
        assert!(
            matches!(
                store.open_artifact("a", key).await,
                Err(StoreError::InvalidKey(_))
            ),
            "{key} should be rejected"
        );
    }
    assert!(matches!(
        store.open_artifact("a", RECORD_FILE).await,
        Err(StoreError::NotFound(_))
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_open_artifact_rejects_symlink_escape() {
    let (store, dir) = open_store().await;
    let secret = dir.path().join("secret.txt");
    std::fs::write(&secret, "top secret").unwrap();

    let job_dir = store.create("sneaky").await.unwrap();
    std::os::unix::fs::symlink(&secret, job_dir.join("link.txt")).unwrap();

    assert!(matches!(
        store.open_artifact("sneaky", "link.txt").await,
        Err(StoreError::InvalidKey(_))
    ));
}

#[tokio::test]
async fn test_failed_save_cleans_up_temp_file() {
    let (store, _dir) = open_store().await;
    // A non-empty directory where the record should go makes the rename fail
    let blocker = store.job_dir("blocked").join(RECORD_FILE);
    std::fs::create_dir_all(blocker.join("inner")).unwrap();

    assert!(matches!(
        store.save(&finished_record("blocked")).await,
        Err(StoreError::Io { .. })
    ));

    let leftovers: Vec<String> = std::fs::read_dir(store.job_dir("blocked"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name != RECORD_FILE)
        .collect();
    assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
}
