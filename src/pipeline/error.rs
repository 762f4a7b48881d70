use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::storage::StorageError;

/// Terminal failure of a pipeline stage. Turning it into a response is the
/// `ErrorSent` transition.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed request: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StorageError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::Store(err) => match err {
                StorageError::NotFound => StatusCode::BAD_REQUEST,
                StorageError::Gone => StatusCode::GONE,
                StorageError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                StorageError::Unavailable(_)
                | StorageError::KeyExhausted
                | StorageError::Database(_)
                | StorageError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}
