use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::api::AppState;
use crate::storage::{OpContext, StorageError};

/// Redirect to original URL
pub async fn redirect_url(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Response {
    let ctx = OpContext::with_timeout(state.request_timeout);

    match state.store.get(&ctx, &key).await {
        Ok(target) => (
            StatusCode::TEMPORARY_REDIRECT,
            [(header::LOCATION, target)],
        )
            .into_response(),
        Err(StorageError::Gone) => (StatusCode::GONE, "This link has been deleted").into_response(),
        Err(StorageError::NotFound) => (StatusCode::BAD_REQUEST, "URL not found").into_response(),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "redirect lookup failed");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

/// Storage reachability check
pub async fn ping(State(state): State<Arc<AppState>>) -> Response {
    let ctx = OpContext::with_timeout(state.request_timeout);

    match state.store.ping(&ctx).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "storage ping failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
