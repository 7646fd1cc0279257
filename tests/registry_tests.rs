
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;

use bench_worker::error::WorkerError;
use bench_worker::properties::Properties;
use bench_worker::scheduler::job::{CANCELLED_REASON, INTERRUPTED_REASON};
use bench_worker::scheduler::{JobRecord, JobState};
use test_harness::{behavior, TestWorker, RESULT_ARTIFACT, RESULT_CONTENT};

#[tokio::test]
async fn test_create_job_is_initialized_and_persisted() {
    let worker = TestWorker::new().await;

    let job = worker
        .registry
        .create_job("bench1", behavior("succeed"), "core", "mock")
        .await
        .unwrap();
    assert_eq!(job.state().await, JobState::Initialized);
    assert_eq!(job.workload(), "core");
    assert_eq!(job.database(), "mock");

    let stored = worker.registry.store().load("bench1").await.unwrap();
    assert_eq!(stored.state, JobState::Initialized);
    assert!(stored.started_at.is_none());

    let same = worker.registry.get_job("bench1").await.unwrap();
    assert!(Arc::ptr_eq(&job, &same));
}

#[tokio::test]
async fn test_duplicate_id_is_a_conflict() {
    let worker = TestWorker::new().await;
    worker
        .registry
        .create_job("dup", Properties::new(), "core", "mock")
        .await
        .unwrap();

    let err = worker
        .registry
        .create_job("dup", Properties::new(), "core", "mock")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Conflict(ref id) if id == "dup"));
}

#[tokio::test]
async fn test_run_to_finished() {
    let worker = TestWorker::new().await;
    worker
        .registry
        .create_job("bench1", behavior("succeed"), "core", "mock")
        .await
        .unwrap();

    let record = worker.registry.run_job("bench1").await.unwrap();
    assert_eq!(record.state, JobState::Finished);
    let started = record.started_at.expect("started_at set");
    let finished = record.finished_at.expect("finished_at set");
    assert!(finished >= started);
    assert!(record.error.is_none());

    // Persisted copy matches what the caller saw
    let stored = worker.registry.store().load("bench1").await.unwrap();
    assert_eq!(stored, record);
    assert!(!worker.registry.is_busy());
}

#[tokio::test]
async fn test_unknown_database_inserts_nothing() {
    let worker = TestWorker::new().await;

    let err = worker
        .registry
        .create_job("bench2", Properties::new(), "core", "doesnotexist")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::UnknownDatabase(ref name) if name == "doesnotexist"));

    assert!(worker.registry.list_jobs().await.is_empty());
    assert!(!worker.registry.store().exists("bench2").await);
    assert!(matches!(
        worker.registry.get_job("bench2").await,
        Err(WorkerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_unknown_workload_inserts_nothing() {
    let worker = TestWorker::new().await;

    let err = worker
        .registry
        .create_job("w", Properties::new(), "nosuch", "mock")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::UnknownWorkload(_)));
    assert!(!worker.registry.store().exists("w").await);
}

#[tokio::test]
async fn test_bad_configuration_fails_initialization() {
    let worker = TestWorker::new().await;

    let err = worker
        .registry
        .create_job(
            "bad",
            Properties::new().with("operationcount", "many"),
            "core",
            "mock",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::InitializationFailed(_)));
    assert!(worker.registry.list_jobs().await.is_empty());
}

#[tokio::test]
async fn test_failed_run_ends_in_error() {
    let worker = TestWorker::new().await;
    worker
        .registry
        .create_job("f", behavior("fail"), "core", "mock")
        .await
        .unwrap();

    let record = worker.registry.run_job("f").await.unwrap();
    assert_eq!(record.state, JobState::Error);
    assert!(record.finished_at.is_some());
    assert!(record.error.as_deref().unwrap().contains("mock failure"));
    assert!(!worker.registry.is_busy());
}

#[tokio::test]
async fn test_panicking_benchmark_releases_permit() {
    let worker = TestWorker::new().await;
    worker
        .registry
        .create_job("p", behavior("panic"), "core", "mock")
        .await
        .unwrap();

    let record = worker.registry.run_job("p").await.unwrap();
    assert_eq!(record.state, JobState::Error);
    assert_eq!(record.error.as_deref(), Some("benchmark panicked"));

    // Next job is not blocked
    worker
        .registry
        .create_job("after", behavior("succeed"), "core", "mock")
        .await
        .unwrap();
    let record = worker.registry.run_job("after").await.unwrap();
    assert_eq!(record.state, JobState::Finished);
}

#[tokio::test]
async fn test_terminal_jobs_cannot_run_again() {
    let worker = TestWorker::new().await;
    worker
        .registry
        .create_job("once", behavior("succeed"), "core", "mock")
        .await
        .unwrap();
    worker.registry.run_job("once").await.unwrap();

    let err = worker.registry.run_job("once").await.unwrap_err();
    assert!(matches!(
        err,
        WorkerError::InvalidState {
            expected: JobState::Initialized,
            actual: JobState::Finished,
            ..
        }
    ));
}

#[tokio::test]
async fn test_second_run_while_busy_is_rejected() {
    let worker = TestWorker::new().await;
    let running = worker.start_gated("bench3").await;
    assert!(worker.registry.is_busy());
    assert_eq!(worker.state_of("bench3").await, JobState::Started);

    worker
        .registry
        .create_job("bench4", behavior("succeed"), "core", "mock")
        .await
        .unwrap();
    let err = worker.registry.run_job("bench4").await.unwrap_err();
    assert!(matches!(err, WorkerError::Busy));
    assert_eq!(worker.state_of("bench4").await, JobState::Initialized);

    worker.gate.open();
    running.await.unwrap();
    assert_eq!(worker.state_of("bench3").await, JobState::Finished);

    // Permit is back; bench4 can now run
    let record = worker.registry.run_job("bench4").await.unwrap();
    assert_eq!(record.state, JobState::Finished);
}

#[tokio::test]
async fn test_submit_while_busy_leaves_no_job() {
    let worker = TestWorker::new().await;
    let running = worker.start_gated("long").await;

    let err = worker
        .registry
        .submit_job("late", behavior("succeed"), "core", "mock")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Busy));
    assert!(!worker.registry.store().exists("late").await);
    assert!(matches!(
        worker.registry.get_job("late").await,
        Err(WorkerError::NotFound(_))
    ));

    worker.gate.open();
    running.await.unwrap();
}

#[tokio::test]
async fn test_submit_creates_and_runs() {
    let worker = TestWorker::new().await;

    let record = worker
        .registry
        .submit_job("s", behavior("succeed"), "core", "mock")
        .await
        .unwrap();
    assert_eq!(record.state, JobState::Finished);

    let err = worker
        .registry
        .submit_job("s", behavior("succeed"), "core", "mock")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Conflict(_)));
}

#[tokio::test]
async fn test_shutdown_cancels_running_job() {
    let worker = TestWorker::new().await;
    let running = worker.start_gated("c").await;

    worker.shutdown.cancel();
    running.await.unwrap();

    let job = worker.registry.get_job("c").await.unwrap();
    let record = job.record().await;
    assert_eq!(record.state, JobState::Error);
    assert_eq!(record.error.as_deref(), Some(CANCELLED_REASON));

    let stored = worker.registry.store().load("c").await.unwrap();
    assert_eq!(stored.state, JobState::Error);
    assert!(!worker.registry.is_busy());
}

#[tokio::test]
async fn test_jobs_survive_restart() {
    let worker = TestWorker::new().await;
    worker
        .registry
        .create_job("kept", behavior("succeed"), "core", "mock")
        .await
        .unwrap();
    let before = worker.registry.run_job("kept").await.unwrap();
    worker
        .registry
        .create_job("pending", behavior("succeed"), "core", "mock")
        .await
        .unwrap();

    let TestWorker { registry, dir, .. } = worker;
    drop(registry);
    let restarted = TestWorker::in_dir(dir).await;

    // Nothing is loaded eagerly
    assert!(restarted.registry.list_jobs().await.is_empty());

    let after = restarted.registry.get_job("kept").await.unwrap();
    assert_eq!(after.record().await, before);

    // Configuration came back too, so the pending job is runnable
    let pending = restarted.registry.get_job("pending").await.unwrap();
    assert_eq!(pending.configuration().get("mock.behavior"), Some("succeed"));
    let record = restarted.registry.run_job("pending").await.unwrap();
    assert_eq!(record.state, JobState::Finished);
}

#[tokio::test]
async fn test_started_record_is_marked_interrupted() {
    let worker = TestWorker::new().await;
    let store = worker.registry.store().clone();
    store.create("crashed").await.unwrap();
    store
        .save(&JobRecord {
            id: "crashed".to_string(),
            state: JobState::Started,
            started_at: Some(chrono::Utc::now()),
            finished_at: None,
            workload: "core".to_string(),
            database: "mock".to_string(),
            error: None,
        })
        .await
        .unwrap();

    let record = worker.registry.get_job("crashed").await.unwrap().record().await;
    assert_eq!(record.state, JobState::Error);
    assert_eq!(record.error.as_deref(), Some(INTERRUPTED_REASON));
    assert!(record.finished_at.unwrap() >= record.started_at.unwrap());

    let stored = store.load("crashed").await.unwrap();
    assert_eq!(stored.state, JobState::Error);
}

#[tokio::test]
async fn test_serve_artifact_of_finished_job() {
    let worker = TestWorker::new().await;
    worker
        .registry
        .submit_job("art", behavior("succeed"), "core", "mock")
        .await
        .unwrap();

    let mut artifact = worker
        .registry
        .serve_artifact("art", RESULT_ARTIFACT)
        .await
        .unwrap();
    assert_eq!(artifact.len, RESULT_CONTENT.len() as u64);
    let mut content = String::new();
    artifact.file.read_to_string(&mut content).await.unwrap();
    assert_eq!(content, RESULT_CONTENT);

    assert!(matches!(
        worker.registry.serve_artifact("art", "missing.txt").await,
        Err(WorkerError::NotFound(_))
    ));
    assert!(matches!(
        worker.registry.serve_artifact("art", "../art/job.json").await,
        Err(WorkerError::InvalidKey(_))
    ));
    assert!(matches!(
        worker.registry.serve_artifact("art", "job.json").await,
        Err(WorkerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_serve_artifact_requires_finished() {
    let worker = TestWorker::new().await;
    worker
        .registry
        .create_job("early", behavior("succeed"), "core", "mock")
        .await
        .unwrap();
    assert!(matches!(
        worker.registry.serve_artifact("early", RESULT_ARTIFACT).await,
        Err(WorkerError::InvalidState {
            expected: JobState::Finished,
            actual: JobState::Initialized,
            ..
        })
    ));

    worker
        .registry
        .submit_job("failed", behavior("fail"), "core", "mock")
        .await
        .unwrap();
    assert!(matches!(
        worker.registry.serve_artifact("failed", RESULT_ARTIFACT).await,
        Err(WorkerError::InvalidState {
            actual: JobState::Error,
            ..
        })
    ));

    assert!(matches!(
        worker.registry.serve_artifact("nosuch", RESULT_ARTIFACT).await,
        Err(WorkerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_invalid_job_ids_are_rejected() {
    let worker = TestWorker::new().await;
    for id in ["", "..", "a/b", "has space"] {
        assert!(matches!(
            worker
                .registry
                .create_job(id, Properties::new(), "core", "mock")
                .await,
            Err(WorkerError::InvalidJobId(_))
        ));
        assert!(matches!(
            worker.registry.get_job(id).await,
            Err(WorkerError::InvalidJobId(_))
        ));
    }
}

#[tokio::test]
async fn test_list_jobs_is_sorted() {
    let worker = TestWorker::new().await;
    for id in ["c", "a", "b"] {
        worker
            .registry
            .create_job(id, Properties::new(), "core", "mock")
            .await
            .unwrap();
    }
    let ids: Vec<String> = worker
        .registry
        .list_jobs()
        .await
        .into_iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_permit_frees_after_dropped_caller() {
    let worker = TestWorker::new().await;
    worker
        .registry
        .create_job("orphan", behavior("gated"), "core", "mock")
        .await
        .unwrap();

    let registry = Arc::clone(&worker.registry);
    let caller = tokio::spawn(async move { registry.run_job("orphan").await });
    worker.gate.wait_entered().await;
    caller.abort();

    // The run keeps going without its caller
    assert!(worker.registry.is_busy());
    worker.gate.open();

    let registry = Arc::clone(&worker.registry);
    test_harness::assert_eventually(
        || {
            let registry = Arc::clone(&registry);
            async move { !registry.is_busy() }
        },
        Duration::from_secs(5),
        "permit should be released once the detached run ends",
    )
    .await;
    assert_eq!(worker.state_of("orphan").await, JobState::Finished);
}

#[tokio::test]
async fn test_rehydrated_terminal_job_tolerates_missing_database() {
    let worker = TestWorker::new().await;
    let store = worker.registry.store().clone();
    let record = |id: &str, state: JobState| JobRecord {
        id: id.to_string(),
        state,
        started_at: None,
        finished_at: None,
        workload: "core".to_string(),
        database: "retired".to_string(),
        error: None,
    };

    let done = JobRecord {
        started_at: Some(chrono::Utc::now()),
        finished_at: Some(chrono::Utc::now()),
        ..record("done", JobState::Finished)
    };
    store.save(&done).await.unwrap();
    let job = worker.registry.get_job("done").await.unwrap();
    assert_eq!(job.state().await, JobState::Finished);

    store.save(&record("pending", JobState::Initialized)).await.unwrap();
    assert!(matches!(
        worker.registry.get_job("pending").await,
        Err(WorkerError::UnknownDatabase(ref name)) if name == "retired"
    ));
}
