//! Benchmark collaborators driven by a job.
//!
//! A job never talks to a data store itself. It resolves two names from its
//! request against a [`BenchCatalog`]:
//! - a **workload**, which generates operations (reads, updates, inserts, scans)
//! - a **database**, which applies those operations to a target store
//!
//! and hands both to a [`BenchmarkClient`] that executes the run.
//!
//! # Components
//!
//! - [`catalog`]: name → constructor tables populated at startup
//! - [`workload::CoreWorkload`]: the `core` read/update/insert/scan mix
//! - [`db`]: the `epsilon` (no-op) and `memory` databases
//! - [`client::StandardClient`]: load phase, transaction phase, `summary.json`

pub mod catalog;
pub mod client;
pub mod db;
pub mod workload;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use rand::rngs::StdRng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::properties::PropertiesError;

pub use catalog::BenchCatalog;
pub use client::StandardClient;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("invalid configuration: {0}")]
    Config(#[from] PropertiesError),

    #[error("{0}")]
    Init(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode summary: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Field name to value.
pub type Record = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationKind {
    Read,
    Update,
    Insert,
    Scan,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Update => "update",
            OperationKind::Insert => "insert",
            OperationKind::Scan => "scan",
            OperationKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Read {
        table: String,
        key: String,
    },
    Update {
        table: String,
        key: String,
        values: Record,
    },
    Insert {
        table: String,
        key: String,
        values: Record,
    },
    Scan {
        table: String,
        start_key: String,
        count: usize,
    },
    Delete {
        table: String,
        key: String,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Read { .. } => OperationKind::Read,
            Operation::Update { .. } => OperationKind::Update,
            Operation::Insert { .. } => OperationKind::Insert,
            Operation::Scan { .. } => OperationKind::Scan,
            Operation::Delete { .. } => OperationKind::Delete,
        }
    }
}

/// Generates the operations of a benchmark.
pub trait Workload: Send + Sync {
    fn name(&self) -> &str;

    /// Records inserted before the measured phase.
    fn record_count(&self) -> u64;

    /// Operations issued during the measured phase.
    fn operation_count(&self) -> u64;

    /// Insert for record `seq` of the load phase.
    fn load_operation(&self, seq: u64, rng: &mut StdRng) -> Operation;

    /// Next operation of the measured phase.
    fn next_operation(&self, rng: &mut StdRng) -> Operation;
}

/// Applies workload operations to a target store.
#[async_trait]
pub trait Database: Send + Sync {
    fn name(&self) -> &str;

    async fn read(&self, table: &str, key: &str) -> Result<Option<Record>, BenchError>;

    async fn scan(
        &self,
        table: &str,
        start_key: &str,
        count: usize,
    ) -> Result<Vec<Record>, BenchError>;

    async fn update(&self, table: &str, key: &str, values: Record) -> Result<(), BenchError>;

    async fn insert(&self, table: &str, key: &str, values: Record) -> Result<(), BenchError>;

    async fn delete(&self, table: &str, key: &str) -> Result<(), BenchError>;

    async fn close(&self) -> Result<(), BenchError> {
        Ok(())
    }
}

/// Where a run executes and leaves its artifacts.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub job_id: String,
    pub artifact_dir: PathBuf,
}

/// Executes one full benchmark run.
///
/// Implementations must return [`BenchError::Cancelled`] promptly once
/// `cancel` fires.
#[async_trait]
pub trait BenchmarkClient: Send + Sync {
    async fn run(&self, ctx: &RunContext, cancel: CancellationToken) -> Result<(), BenchError>;
}
