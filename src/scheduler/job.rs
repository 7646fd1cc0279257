use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bench::{BenchCatalog, BenchError, BenchmarkClient, RunContext};
use crate::error::{Result, WorkerError};
use crate::properties::Properties;
use crate::scheduler::JobState;
use crate::store::JobStore;

pub const MAX_JOB_ID_LEN: usize = 128;

/// Reason recorded for a run stopped by its cancellation token.
pub const CANCELLED_REASON: &str = "cancelled";

/// Reason recorded for a run found in state `started` when rehydrated.
pub const INTERRUPTED_REASON: &str = "interrupted";

/// Public, persisted view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub state: JobState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub workload: String,
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

impl RunOutcome {
    pub fn state(&self) -> JobState {
        match self {
            RunOutcome::Succeeded => JobState::Finished,
            RunOutcome::Failed(_) | RunOutcome::Cancelled => JobState::Error,
        }
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            RunOutcome::Succeeded => None,
            RunOutcome::Failed(reason) => Some(reason.clone()),
            RunOutcome::Cancelled => Some(CANCELLED_REASON.to_string()),
        }
    }
}

/// Job ids name directories, so they are limited to `[A-Za-z0-9._-]`.
pub fn validate_job_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_JOB_ID_LEN
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(WorkerError::InvalidJobId(id.to_string()))
    }
}

struct JobInner {
    state: JobState,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
    /// Rebuilt by `init`; never persisted.
    client: Option<Arc<dyn BenchmarkClient>>,
}

/// One requested benchmark execution.
///
/// Identity and request fields are immutable; everything that changes over
/// the lifecycle lives behind a single lock and is only touched through the
/// methods below.
pub struct Job {
    id: String,
    workload: String,
    database: String,
    configuration: Properties,
    inner: Mutex<JobInner>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("workload", &self.workload)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl Job {
    /// A fresh job in state `initialized`. Call [`Job::init`] before running it.
    pub fn new(
        id: impl Into<String>,
        configuration: Properties,
        workload: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            workload: workload.into(),
            database: database.into(),
            configuration,
            inner: Mutex::new(JobInner {
                state: JobState::Initialized,
                started_at: None,
                finished_at: None,
                error: None,
                client: None,
            }),
        }
    }

    /// Rebuild a job from its persisted record.
    pub fn from_record(record: JobRecord, configuration: Properties) -> Self {
        Self {
            id: record.id,
            workload: record.workload,
            database: record.database,
            configuration,
            inner: Mutex::new(JobInner {
                state: record.state,
                started_at: record.started_at,
                finished_at: record.finished_at,
                error: record.error,
                client: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workload(&self) -> &str {
        &self.workload
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn configuration(&self) -> &Properties {
        &self.configuration
    }

    pub async fn state(&self) -> JobState {
        self.inner.lock().await.state
    }

    pub async fn record(&self) -> JobRecord {
        let inner = self.inner.lock().await;
        JobRecord {
            id: self.id.clone(),
            state: inner.state,
            started_at: inner.started_at,
            finished_at: inner.finished_at,
            workload: self.workload.clone(),
            database: self.database.clone(),
            error: inner.error.clone(),
        }
    }

    /// Resolve the workload and database and build the benchmark client.
    /// Calling it again replaces the client.
    pub async fn init(&self, catalog: &BenchCatalog) -> Result<()> {
        let client = catalog.build_client(&self.workload, &self.database, &self.configuration)?;
        self.inner.lock().await.client = Some(client);
        Ok(())
    }

    pub async fn save(&self, store: &JobStore) -> Result<()> {
        let record = self.record().await;
        store.save(&record).await?;
        Ok(())
    }

    /// Drive the job from `initialized` to `finished` or `error`.
    ///
    /// The record is persisted after entering `started` and after reaching
    /// the terminal state. Benchmark failures, panics and cancellation end in
    /// `error` and are reported through the returned outcome; `Err` means the
    /// job could not be started or its record could not be written.
    pub async fn run(&self, store: &JobStore, cancel: CancellationToken) -> Result<RunOutcome> {
        let client = self.start().await?;
        tracing::info!(job_id = %self.id, workload = %self.workload, database = %self.database, "Job started");

        let artifact_dir = match self.save(store).await {
            Ok(()) => store.ensure_dir(&self.id).await.map_err(WorkerError::from),
            Err(e) => Err(e),
        };
        let artifact_dir = match artifact_dir {
            Ok(dir) => dir,
            Err(e) => {
                self.finish(&RunOutcome::Failed("failed to persist job".to_string()))
                    .await;
                if let Err(save_err) = self.save(store).await {
                    tracing::error!(job_id = %self.id, error = %save_err, "Failed to persist job");
                }
                return Err(e);
            }
        };

        let ctx = RunContext {
            job_id: self.id.clone(),
            artifact_dir,
        };
        let outcome = execute_isolated(client, ctx, cancel).await;
        self.finish(&outcome).await;

        match &outcome {
            RunOutcome::Succeeded => tracing::info!(job_id = %self.id, "Job finished"),
            RunOutcome::Cancelled => tracing::warn!(job_id = %self.id, "Job cancelled"),
            RunOutcome::Failed(reason) => {
                tracing::warn!(job_id = %self.id, error = %reason, "Job failed")
            }
        }

        self.save(store).await?;
        Ok(outcome)
    }

    /// `initialized -> started`. Returns the client to run.
    async fn start(&self) -> Result<Arc<dyn BenchmarkClient>> {
        let mut inner = self.inner.lock().await;
        if !inner.state.can_transition_to(JobState::Started) {
            return Err(WorkerError::InvalidState {
                id: self.id.clone(),
                expected: JobState::Initialized,
                actual: inner.state,
            });
        }
        let client = inner.client.clone().ok_or_else(|| {
            WorkerError::Internal(format!("job {} has no benchmark client", self.id))
        })?;
        inner.state = JobState::Started;
        inner.started_at = Some(Utc::now());
        Ok(client)
    }

    /// `started -> finished | error`. Ignored in any other state.
    async fn finish(&self, outcome: &RunOutcome) {
        let mut inner = self.inner.lock().await;
        let next = outcome.state();
        if !inner.state.can_transition_to(next) {
            return;
        }
        let now = Utc::now();
        inner.state = next;
        inner.finished_at = Some(inner.started_at.map_or(now, |started| started.max(now)));
        inner.error = outcome.reason();
    }

    /// Mark a rehydrated `started` job as interrupted. Returns whether the
    /// state changed.
    pub(crate) async fn interrupt(&self) -> bool {
        let was_started = self.state().await == JobState::Started;
        if was_started {
            self.finish(&RunOutcome::Failed(INTERRUPTED_REASON.to_string()))
                .await;
        }
        was_started
    }
}

/// Run the client on its own task so a panic inside the benchmark ends the
/// job instead of the caller.
async fn execute_isolated(
    client: Arc<dyn BenchmarkClient>,
    ctx: RunContext,
    cancel: CancellationToken,
) -> RunOutcome {
    let handle = tokio::spawn(async move { client.run(&ctx, cancel).await });
    match handle.await {
        Ok(Ok(())) => RunOutcome::Succeeded,
        Ok(Err(BenchError::Cancelled)) => RunOutcome::Cancelled,
        Ok(Err(e)) => RunOutcome::Failed(e.to_string()),
        Err(e) if e.is_cancelled() => RunOutcome::Cancelled,
        Err(_) => RunOutcome::Failed("benchmark panicked".to_string()),
    }
}
