use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bench::BenchCatalog;
use crate::error::{Result, WorkerError};
use crate::properties::Properties;
use crate::scheduler::job::{validate_job_id, Job, JobRecord};
use crate::scheduler::permit::{ExecutionGuard, ExecutionPermit};
use crate::scheduler::JobState;
use crate::store::{Artifact, JobStore};

/// Process-wide authority over jobs.
///
/// Owns the in-memory job map and the single execution permit. Constructed
/// once at startup and shared (behind an `Arc`) with every request handler.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, Arc<Job>>>,
    permit: ExecutionPermit,
    store: JobStore,
    catalog: Arc<BenchCatalog>,
    shutdown: CancellationToken,
}

impl JobRegistry {
    pub fn new(store: JobStore, catalog: BenchCatalog) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            permit: ExecutionPermit::new(),
            store,
            catalog: Arc::new(catalog),
            shutdown: CancellationToken::new(),
        }
    }

    /// Runs receive child tokens of `token`; cancelling it stops them.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn catalog(&self) -> &BenchCatalog {
        &self.catalog
    }

    /// Whether a job is executing right now.
    pub fn is_busy(&self) -> bool {
        !self.permit.is_available()
    }

    /// Snapshot of every job known to this process, ordered by id.
    pub async fn list_jobs(&self) -> Vec<JobRecord> {
        let jobs: Vec<Arc<Job>> = self.jobs.lock().await.values().cloned().collect();
        let mut records = Vec::with_capacity(jobs.len());
        for job in jobs {
            records.push(job.record().await);
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Create, initialize and persist a new job in state `initialized`.
    ///
    /// Nothing is inserted or written when initialization fails.
    pub async fn create_job(
        &self,
        id: &str,
        configuration: Properties,
        workload: &str,
        database: &str,
    ) -> Result<Arc<Job>> {
        validate_job_id(id)?;

        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(id) || self.store.exists(id).await {
            return Err(WorkerError::Conflict(id.to_string()));
        }

        let job = Job::new(id, configuration, workload, database);
        job.init(&self.catalog).await?;

        self.store.create(id).await?;
        let persisted = async {
            self.store
                .save_configuration(id, job.configuration())
                .await?;
            job.save(&self.store).await
        }
        .await;
        if let Err(e) = persisted {
            if let Err(cleanup) = self.store.remove(id).await {
                tracing::warn!(job_id = %id, error = %cleanup, "Failed to clean up job directory");
            }
            return Err(e);
        }

        let job = Arc::new(job);
        jobs.insert(id.to_string(), Arc::clone(&job));
        tracing::info!(job_id = %id, workload = %workload, database = %database, "Job created");
        Ok(job)
    }

    /// Look a job up in memory, falling back to the store.
    ///
    /// A job loaded from the store is re-initialized and kept in memory so
    /// later lookups return the same object.
    pub async fn get_job(&self, id: &str) -> Result<Arc<Job>> {
        validate_job_id(id)?;

        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get(id) {
            return Ok(Arc::clone(job));
        }

        let record = self.store.load(id).await?;
        let configuration = self.store.load_configuration(id).await?;
        let job = Job::from_record(record, configuration);

        if job.interrupt().await {
            tracing::warn!(job_id = %id, "Job was running when the worker stopped");
            job.save(&self.store).await?;
        }

        if let Err(e) = job.init(&self.catalog).await {
            if !job.state().await.is_terminal() {
                return Err(e);
            }
            tracing::warn!(job_id = %id, error = %e, "Could not re-initialize job");
        }

        let job = Arc::new(job);
        jobs.insert(id.to_string(), Arc::clone(&job));
        tracing::debug!(job_id = %id, "Job loaded from store");
        Ok(job)
    }

    /// Run an existing job in state `initialized`.
    ///
    /// Never waits for the permit: returns [`WorkerError::Busy`] right away
    /// when another job holds it. Blocks until the run ends otherwise.
    pub async fn run_job(&self, id: &str) -> Result<JobRecord> {
        let job = self.get_job(id).await?;
        let state = job.state().await;
        if state != JobState::Initialized {
            return Err(WorkerError::InvalidState {
                id: id.to_string(),
                expected: JobState::Initialized,
                actual: state,
            });
        }
        let guard = self.permit.try_acquire().ok_or(WorkerError::Busy)?;
        self.run_with_permit(job, guard).await
    }

    /// Create a job and run it in one step.
    ///
    /// The permit is taken before the job is created, so a busy worker
    /// rejects the request without leaving a job behind.
    pub async fn submit_job(
        &self,
        id: &str,
        configuration: Properties,
        workload: &str,
        database: &str,
    ) -> Result<JobRecord> {
        validate_job_id(id)?;
        if self.jobs.lock().await.contains_key(id) || self.store.exists(id).await {
            return Err(WorkerError::Conflict(id.to_string()));
        }

        let guard = self.permit.try_acquire().ok_or(WorkerError::Busy)?;
        let job = self
            .create_job(id, configuration, workload, database)
            .await?;
        self.run_with_permit(job, guard).await
    }

    async fn run_with_permit(&self, job: Arc<Job>, guard: ExecutionGuard) -> Result<JobRecord> {
        let store = self.store.clone();
        let cancel = self.shutdown.child_token();
        let task_job = Arc::clone(&job);

        // Detached so a dropped request cannot abandon the run halfway.
        let handle = tokio::spawn(async move {
            let _guard = guard;
            task_job.run(&store, cancel).await
        });

        match handle.await {
            Ok(result) => {
                result?;
                Ok(job.record().await)
            }
            Err(e) => Err(WorkerError::Internal(format!(
                "run of job {} aborted: {e}",
                job.id()
            ))),
        }
    }

    /// Open an artifact of a finished job.
    pub async fn serve_artifact(&self, id: &str, key: &str) -> Result<Artifact> {
        let job = self.get_job(id).await?;
        let state = job.state().await;
        if state != JobState::Finished {
            return Err(WorkerError::InvalidState {
                id: id.to_string(),
                expected: JobState::Finished,
                actual: state,
            });
        }
        Ok(self.store.open_artifact(id, key).await?)
    }
}
