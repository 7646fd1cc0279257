//! Remote counterpart of the control surface in [`crate::server`].

use std::pin::Pin;

use bytes::Bytes;
use reqwest::{Response, StatusCode, Url};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_stream::{Stream, StreamExt};

use crate::config::ClientConfig;
use crate::properties::Properties;
use crate::scheduler::JobRecord;
use crate::server::ErrorBody;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("worker busy: {0}")]
    Busy(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("server returned {status}: {message}")]
    RemoteError { status: StatusCode, message: String },

    #[error("invalid worker address {addr:?}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ArtifactStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// HTTP client for a remote worker.
#[derive(Debug, Clone)]
pub struct ControlClient {
    base: Url,
    http: reqwest::Client,
}

impl ControlClient {
    /// Client for the worker at `addr` with default settings.
    pub fn new(addr: &str) -> Result<Self, ClientError> {
        Self::with_config(&ClientConfig::new(addr))
    }

    pub fn with_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidAddress {
            addr: config.addr.clone(),
            reason,
        };
        let raw = if config.addr.contains("://") {
            config.addr.clone()
        } else {
            format!("http://{}", config.addr)
        };
        let base = Url::parse(&raw).map_err(|e| invalid(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(invalid("not a base URL".to_string()));
        }

        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            base,
            http: builder.build()?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobRecord>, ClientError> {
        let response = self
            .http
            .get(self.endpoint(&["job", "list"]))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn job_status(&self, id: &str) -> Result<JobRecord, ClientError> {
        let response = self
            .http
            .get(self.endpoint(&["job", "status", id]))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Submit a job and wait for its run to end.
    ///
    /// Success means the worker accepted and ran the job; whether the run
    /// itself succeeded is reported by [`ControlClient::job_status`].
    pub async fn start_job(
        &self,
        id: &str,
        configuration: &Properties,
        database: &str,
        workload: &str,
    ) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.endpoint(&["job", "run", id]))
            .query(&[("database", database), ("workload", workload)])
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(configuration.to_string())
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    pub async fn download_artifact(
        &self,
        id: &str,
        key: &str,
    ) -> Result<ArtifactStream, ClientError> {
        let response = self
            .http
            .get(self.endpoint(&["job", "download", id]))
            .query(&[("key", key)])
            .send()
            .await?;
        let stream = check(response)
            .await?
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from));
        Ok(Box::pin(stream))
    }

    /// Download an artifact into `writer`. Returns the number of bytes written.
    pub async fn download_artifact_to<W>(
        &self,
        id: &str,
        key: &str,
        writer: &mut W,
    ) -> Result<u64, ClientError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut stream = self.download_artifact(id, key).await?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }
}

/// Pass successful responses through; turn the rest into typed errors.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let (message, code) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.message, body.code),
        Err(_) if text.is_empty() => (status.to_string(), None),
        Err(_) => (text, None),
    };

    Err(match (code.as_deref(), status) {
        (Some("busy"), _) | (None, StatusCode::LOCKED) => ClientError::Busy(message),
        (Some("conflict"), _) => ClientError::Conflict(message),
        (Some("not_found"), _) | (None, StatusCode::NOT_FOUND) => ClientError::NotFound(message),
        (Some("invalid_state"), _) => ClientError::InvalidState(message),
        _ => ClientError::RemoteError { status, message },
    })
}
