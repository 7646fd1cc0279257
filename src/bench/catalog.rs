use std::collections::HashMap;
use std::sync::Arc;

use crate::bench::db::{EpsilonDb, MemoryDb};
use crate::bench::workload::CoreWorkload;
use crate::bench::{BenchError, BenchmarkClient, Database, StandardClient, Workload};
use crate::error::{Result, WorkerError};
use crate::properties::Properties;

pub type WorkloadFactory =
    Arc<dyn Fn(&Properties) -> std::result::Result<Arc<dyn Workload>, BenchError> + Send + Sync>;

pub type DatabaseFactory =
    Arc<dyn Fn(&Properties) -> std::result::Result<Arc<dyn Database>, BenchError> + Send + Sync>;

pub type ClientFactory = Arc<
    dyn Fn(
            &Properties,
            Arc<dyn Workload>,
            Arc<dyn Database>,
        ) -> std::result::Result<Arc<dyn BenchmarkClient>, BenchError>
        + Send
        + Sync,
>;

/// Registration tables for workloads and databases, plus the constructor of
/// the benchmark client that joins them.
///
/// Built once at startup and shared by every job. Resolution is a plain
/// lookup; an unregistered name is reported as
/// [`WorkerError::UnknownWorkload`] or [`WorkerError::UnknownDatabase`].
#[derive(Clone)]
pub struct BenchCatalog {
    workloads: HashMap<String, WorkloadFactory>,
    databases: HashMap<String, DatabaseFactory>,
    client: ClientFactory,
}

impl std::fmt::Debug for BenchCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchCatalog")
            .field("workloads", &self.workload_names())
            .field("databases", &self.database_names())
            .finish()
    }
}

impl Default for BenchCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl BenchCatalog {
    /// Empty tables with the given client constructor.
    pub fn new<F>(client: F) -> Self
    where
        F: Fn(
                &Properties,
                Arc<dyn Workload>,
                Arc<dyn Database>,
            ) -> std::result::Result<Arc<dyn BenchmarkClient>, BenchError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            workloads: HashMap::new(),
            databases: HashMap::new(),
            client: Arc::new(client),
        }
    }

    /// The `core` workload, the `epsilon` and `memory` databases and the
    /// standard client.
    pub fn builtin() -> Self {
        Self::new(|props, workload, database| {
            let client = StandardClient::from_properties(props, workload, database)?;
            Ok(Arc::new(client) as Arc<dyn BenchmarkClient>)
        })
        .with_workload("core", |props| {
            Ok(Arc::new(CoreWorkload::from_properties(props)?) as Arc<dyn Workload>)
        })
        .with_database("epsilon", |_| Ok(Arc::new(EpsilonDb) as Arc<dyn Database>))
        .with_database("memory", |_| {
            Ok(Arc::new(MemoryDb::default()) as Arc<dyn Database>)
        })
    }

    pub fn with_workload<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Properties) -> std::result::Result<Arc<dyn Workload>, BenchError>
            + Send
            + Sync
            + 'static,
    {
        self.workloads.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn with_database<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Properties) -> std::result::Result<Arc<dyn Database>, BenchError>
            + Send
            + Sync
            + 'static,
    {
        self.databases.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn workload_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workloads.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn database_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.databases.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn resolve_workload(&self, name: &str, props: &Properties) -> Result<Arc<dyn Workload>> {
        let factory = self
            .workloads
            .get(name)
            .ok_or_else(|| WorkerError::UnknownWorkload(name.to_string()))?;
        factory(props).map_err(WorkerError::InitializationFailed)
    }

    pub fn resolve_database(&self, name: &str, props: &Properties) -> Result<Arc<dyn Database>> {
        let factory = self
            .databases
            .get(name)
            .ok_or_else(|| WorkerError::UnknownDatabase(name.to_string()))?;
        factory(props).map_err(WorkerError::InitializationFailed)
    }

    /// Resolve both names and build the client that runs them.
    pub fn build_client(
        &self,
        workload: &str,
        database: &str,
        props: &Properties,
    ) -> Result<Arc<dyn BenchmarkClient>> {
        let workload = self.resolve_workload(workload, props)?;
        let database = self.resolve_database(database, props)?;
        (self.client)(props, workload, database).map_err(WorkerError::InitializationFailed)
    }
}
