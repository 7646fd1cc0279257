use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::bench::{BenchError, Database, Record};

/// Accepts every operation and stores nothing. Measures client overhead.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpsilonDb;

#[async_trait]
impl Database for EpsilonDb {
    fn name(&self) -> &str {
        "epsilon"
    }

    async fn read(&self, _table: &str, _key: &str) -> Result<Option<Record>, BenchError> {
        Ok(Some(Record::new()))
    }

    async fn scan(
        &self,
        _table: &str,
        _start_key: &str,
        _count: usize,
    ) -> Result<Vec<Record>, BenchError> {
        Ok(Vec::new())
    }

    async fn update(&self, _table: &str, _key: &str, _values: Record) -> Result<(), BenchError> {
        Ok(())
    }

    async fn insert(&self, _table: &str, _key: &str, _values: Record) -> Result<(), BenchError> {
        Ok(())
    }

    async fn delete(&self, _table: &str, _key: &str) -> Result<(), BenchError> {
        Ok(())
    }
}

/// In-process ordered store, one map per table.
#[derive(Debug, Default)]
pub struct MemoryDb {
    tables: RwLock<BTreeMap<String, BTreeMap<String, Record>>>,
}

impl MemoryDb {
    pub async fn len(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Database for MemoryDb {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read(&self, table: &str, key: &str) -> Result<Option<Record>, BenchError> {
        let tables = self.tables.read().await;
        Ok(tables.get(table).and_then(|rows| rows.get(key)).cloned())
    }

    async fn scan(
        &self,
        table: &str,
        start_key: &str,
        count: usize,
    ) -> Result<Vec<Record>, BenchError> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .range(start_key.to_string()..)
            .take(count)
            .map(|(_, record)| record.clone())
            .collect())
    }

    /// Merges `values` into the record, creating it when absent.
    async fn update(&self, table: &str, key: &str, values: Record) -> Result<(), BenchError> {
        let mut tables = self.tables.write().await;
        tables
            .entry(table.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .extend(values);
        Ok(())
    }

    async fn insert(&self, table: &str, key: &str, values: Record) -> Result<(), BenchError> {
        let mut tables = self.tables.write().await;
        tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), values);
        Ok(())
    }

    async fn delete(&self, table: &str, key: &str) -> Result<(), BenchError> {
        let mut tables = self.tables.write().await;
        if let Some(rows) = tables.get_mut(table) {
            rows.remove(key);
        }
        Ok(())
    }
}
