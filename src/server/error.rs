use axum::{
    extract::rejection::{PathRejection, QueryRejection, StringRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;

/// Error payload of every non-success response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug)]
pub struct ApiError(pub WorkerError);

impl From<WorkerError> for ApiError {
    fn from(err: WorkerError) -> Self {
        ApiError(err)
    }
}

// Extractor rejections answer with the same payload as every other failure.
macro_rules! rejection_into_api_error {
    ($($rejection:ty => $what:literal),* $(,)?) => {
        $(
            impl From<$rejection> for ApiError {
                fn from(rejection: $rejection) -> Self {
                    ApiError(WorkerError::InvalidRequest(format!(
                        concat!($what, ": {}"),
                        rejection.body_text()
                    )))
                }
            }
        )*
    };
}

rejection_into_api_error! {
    PathRejection => "path",
    QueryRejection => "query",
    StringRejection => "body",
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            WorkerError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkerError::Busy => StatusCode::LOCKED,
            WorkerError::InitializationFailed(_)
            | WorkerError::Store(_)
            | WorkerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WorkerError::Conflict(_)
            | WorkerError::InvalidState { .. }
            | WorkerError::InvalidKey(_)
            | WorkerError::InvalidJobId(_)
            | WorkerError::InvalidRequest(_)
            | WorkerError::UnknownWorkload(_)
            | WorkerError::UnknownDatabase(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            // May carry file paths; keep them in the log only.
            WorkerError::Store(_) | WorkerError::Internal(_) => {
                tracing::error!(error = %self.0, "Request failed");
                "internal error".to_string()
            }
            WorkerError::NotFound(_) => {
                tracing::debug!(error = %self.0, "Request failed");
                self.0.to_string()
            }
            other => {
                tracing::warn!(error = %other, "Request failed");
                other.to_string()
            }
        };

        (
            status,
            Json(ErrorBody {
                message,
                code: Some(self.0.code().to_string()),
            }),
        )
            .into_response()
    }
}
