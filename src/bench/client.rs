use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::bench::{
    BenchError, BenchmarkClient, Database, Operation, OperationKind, RunContext, Workload,
};
use crate::properties::Properties;

pub const SUMMARY_ARTIFACT: &str = "summary.json";

/// Latency statistics of one operation kind, in microseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub count: u64,
    pub not_found: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub avg_us: f64,
    #[serde(skip)]
    total_us: u128,
}

impl OperationStats {
    fn record(&mut self, latency: Duration, found: bool) {
        let us = latency.as_micros().min(u64::MAX as u128) as u64;
        if self.count == 0 || us < self.min_us {
            self.min_us = us;
        }
        self.max_us = self.max_us.max(us);
        self.count += 1;
        if !found {
            self.not_found += 1;
        }
        self.total_us += u128::from(us);
        self.avg_us = self.total_us as f64 / self.count as f64;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub operations: u64,
    pub elapsed_ms: u64,
    pub per_operation: BTreeMap<String, OperationStats>,
}

impl PhaseSummary {
    fn record(&mut self, kind: OperationKind, latency: Duration, found: bool) {
        self.operations += 1;
        self.per_operation
            .entry(kind.as_str().to_string())
            .or_default()
            .record(latency, found);
    }

    pub fn throughput(&self) -> f64 {
        if self.elapsed_ms == 0 {
            return 0.0;
        }
        self.operations as f64 * 1000.0 / self.elapsed_ms as f64
    }
}

/// Contents of the `summary.json` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub job_id: String,
    pub workload: String,
    pub database: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub load: PhaseSummary,
    pub run: PhaseSummary,
}

/// Loads `recordcount` records, then issues `operationcount` operations
/// from the workload one after another.
///
/// The first database error aborts the run. Cancellation is observed between
/// and during operations.
pub struct StandardClient {
    workload: Arc<dyn Workload>,
    database: Arc<dyn Database>,
    /// Skips the load phase when the target already holds the data set.
    skip_load: bool,
    seed: Option<u64>,
}

impl StandardClient {
    pub fn new(workload: Arc<dyn Workload>, database: Arc<dyn Database>) -> Self {
        Self {
            workload,
            database,
            skip_load: false,
            seed: None,
        }
    }

    pub fn from_properties(
        props: &Properties,
        workload: Arc<dyn Workload>,
        database: Arc<dyn Database>,
    ) -> Result<Self, BenchError> {
        let seed = match props.get("seed") {
            Some(_) => Some(props.get_u64("seed", 0)?),
            None => None,
        };
        Ok(Self {
            skip_load: props.get_bool("skipload", false)?,
            seed,
            ..Self::new(workload, database)
        })
    }

    async fn execute(&self, op: Operation) -> Result<bool, BenchError> {
        match op {
            Operation::Read { table, key } => {
                Ok(self.database.read(&table, &key).await?.is_some())
            }
            Operation::Update { table, key, values } => {
                self.database.update(&table, &key, values).await?;
                Ok(true)
            }
            Operation::Insert { table, key, values } => {
                self.database.insert(&table, &key, values).await?;
                Ok(true)
            }
            Operation::Scan {
                table,
                start_key,
                count,
            } => Ok(!self
                .database
                .scan(&table, &start_key, count)
                .await?
                .is_empty()),
            Operation::Delete { table, key } => {
                self.database.delete(&table, &key).await?;
                Ok(true)
            }
        }
    }

    async fn execute_tracked(
        &self,
        op: Operation,
        phase: &mut PhaseSummary,
        cancel: &CancellationToken,
    ) -> Result<(), BenchError> {
        let kind = op.kind();
        let begin = Instant::now();
        let found = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BenchError::Cancelled),
            result = self.execute(op) => result?,
        };
        phase.record(kind, begin.elapsed(), found);
        Ok(())
    }
}

#[async_trait]
impl BenchmarkClient for StandardClient {
    async fn run(&self, ctx: &RunContext, cancel: CancellationToken) -> Result<(), BenchError> {
        let started_at = Utc::now();
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        tracing::info!(
            job_id = %ctx.job_id,
            workload = self.workload.name(),
            database = self.database.name(),
            records = self.workload.record_count(),
            operations = self.workload.operation_count(),
            "Starting benchmark"
        );

        let mut load = PhaseSummary::default();
        if !self.skip_load {
            let begin = Instant::now();
            for seq in 0..self.workload.record_count() {
                let op = self.workload.load_operation(seq, &mut rng);
                self.execute_tracked(op, &mut load, &cancel).await?;
            }
            load.elapsed_ms = begin.elapsed().as_millis() as u64;
        }

        let mut run = PhaseSummary::default();
        let begin = Instant::now();
        for _ in 0..self.workload.operation_count() {
            let op = self.workload.next_operation(&mut rng);
            self.execute_tracked(op, &mut run, &cancel).await?;
        }
        run.elapsed_ms = begin.elapsed().as_millis() as u64;

        self.database.close().await?;

        tracing::info!(
            job_id = %ctx.job_id,
            operations = run.operations,
            elapsed_ms = run.elapsed_ms,
            throughput = run.throughput(),
            "Benchmark completed"
        );

        let summary = RunSummary {
            job_id: ctx.job_id.clone(),
            workload: self.workload.name().to_string(),
            database: self.database.name().to_string(),
            started_at,
            finished_at: Utc::now(),
            load,
            run,
        };
        tokio::fs::create_dir_all(&ctx.artifact_dir).await?;
        tokio::fs::write(
            ctx.artifact_dir.join(SUMMARY_ARTIFACT),
            serde_json::to_vec_pretty(&summary)?,
        )
        .await?;
        Ok(())
    }
}
