//! Directory-per-job persistence.
//!
//! ```text
//! <root>/<job id>/job.json            metadata record (schema_version, id, state, ...)
//! <root>/<job id>/config.properties   configuration the job was created with
//! <root>/<job id>/<key>               artifacts written by the benchmark run
//! ```
//!
//! Metadata is replaced with write-to-temp-then-rename so a concurrent reader
//! sees either the previous or the new record, never a torn one.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::properties::Properties;
use crate::scheduler::JobRecord;

pub const RECORD_FILE: &str = "job.json";
pub const CONFIG_FILE: &str = "config.properties";
pub const SCHEMA_VERSION: u32 = 1;

const TEMP_PREFIX: &str = ".tmp.";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no record for job {0}")]
    NotFound(String),

    #[error("record for job {0} already exists")]
    AlreadyExists(String),

    #[error("invalid artifact key {0:?}")]
    InvalidKey(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path}: corrupt record: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// On-disk envelope of a [`JobRecord`].
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    schema_version: u32,
    #[serde(flatten)]
    job: JobRecord,
}

/// An open artifact file.
#[derive(Debug)]
pub struct Artifact {
    pub key: String,
    pub len: u64,
    pub file: fs::File,
}

#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.job_dir(id).join(RECORD_FILE)
    }

    /// Whether a metadata record exists for `id`.
    pub async fn exists(&self, id: &str) -> bool {
        fs::try_exists(self.record_path(id)).await.unwrap_or(false)
    }

    /// Allocate the directory of a new job. Fails if a record already exists.
    pub async fn create(&self, id: &str) -> Result<PathBuf, StoreError> {
        if self.exists(id).await {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }
        self.ensure_dir(id).await
    }

    /// Make sure the job directory exists; a no-op when it does.
    pub async fn ensure_dir(&self, id: &str) -> Result<PathBuf, StoreError> {
        let dir = self.job_dir(id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;
        Ok(dir)
    }

    /// Delete everything stored for `id`.
    pub async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let dir = self.job_dir(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&dir, e)),
        }
    }

    pub async fn load(&self, id: &str) -> Result<JobRecord, StoreError> {
        let path = self.record_path(id);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let stored: StoredRecord =
            serde_json::from_slice(&raw).map_err(|e| StoreError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if stored.schema_version != SCHEMA_VERSION {
            return Err(StoreError::Corrupt {
                path,
                reason: format!("unsupported schema version {}", stored.schema_version),
            });
        }
        if stored.job.id != id {
            return Err(StoreError::Corrupt {
                path,
                reason: format!("record belongs to job {}", stored.job.id),
            });
        }
        Ok(stored.job)
    }

    /// Atomically replace the metadata record of `record.id`.
    pub async fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        let stored = StoredRecord {
            schema_version: SCHEMA_VERSION,
            job: record.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&stored).map_err(|e| StoreError::Corrupt {
            path: self.record_path(&record.id),
            reason: e.to_string(),
        })?;
        self.ensure_dir(&record.id).await?;
        write_atomic(&self.record_path(&record.id), &bytes).await
    }

    pub async fn save_configuration(
        &self,
        id: &str,
        configuration: &Properties,
    ) -> Result<(), StoreError> {
        self.ensure_dir(id).await?;
        let path = self.job_dir(id).join(CONFIG_FILE);
        write_atomic(&path, configuration.to_string().as_bytes()).await
    }

    /// The stored configuration, or an empty set for records written without one.
    pub async fn load_configuration(&self, id: &str) -> Result<Properties, StoreError> {
        let path = self.job_dir(id).join(CONFIG_FILE);
        match fs::read_to_string(&path).await {
            Ok(text) => Properties::parse(&text).map_err(|e| StoreError::Corrupt {
                path,
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Properties::new()),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Open artifact `key` of job `id`. The key must stay inside the job directory.
    pub async fn open_artifact(&self, id: &str, key: &str) -> Result<Artifact, StoreError> {
        let dir = self.job_dir(id);
        let path = dir.join(validate_key(key)?);

        let not_found = || StoreError::NotFound(format!("{id}/{key}"));
        let resolved = match fs::canonicalize(&path).await {
            Ok(resolved) => resolved,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let base = fs::canonicalize(&dir)
            .await
            .map_err(|_| not_found())?;
        if !resolved.starts_with(&base) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }

        let metadata = fs::metadata(&resolved)
            .await
            .map_err(|e| StoreError::io(&resolved, e))?;
        if !metadata.is_file() {
            return Err(not_found());
        }
        let file = fs::File::open(&resolved)
            .await
            .map_err(|e| StoreError::io(&resolved, e))?;

        Ok(Artifact {
            key: key.to_string(),
            len: metadata.len(),
            file,
        })
    }
}

/// Check that `key` names a file below the job directory and is not one of
/// the store's own files.
pub fn validate_key(key: &str) -> Result<&Path, StoreError> {
    let invalid = || StoreError::InvalidKey(key.to_string());
    if key.is_empty() || key.contains('\0') || key.contains('\\') {
        return Err(invalid());
    }

    let path = Path::new(key);
    if !path
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        return Err(invalid());
    }

    let reserved = path.components().count() == 1
        && (key == RECORD_FILE || key == CONFIG_FILE || key.starts_with(TEMP_PREFIX));
    if reserved {
        return Err(StoreError::NotFound(key.to_string()));
    }
    Ok(path)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("record");
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        "{TEMP_PREFIX}{name}.{}.{nanos}",
        std::process::id()
    ));

    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        match fs::remove_file(&tmp).await {
            Ok(()) => {}
            Err(cleanup) if cleanup.kind() == io::ErrorKind::NotFound => {}
            Err(cleanup) => {
                tracing::warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temp file");
            }
        }
        return Err(StoreError::io(path, e));
    }
    Ok(())
}
