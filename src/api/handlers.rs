use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Duration;

use crate::bulk::BulkEngine;
use crate::config::Config;
use crate::models::{BatchItem, ResultItem, ShortenRequest, UserUrl};
use crate::pipeline::{
    Exchange, PipelineError, SessionAssigned, SessionIssuer, StageResult, StoreCall,
};
use crate::storage::{LinkStore, StorageError};

pub struct AppState {
    pub store: Arc<dyn LinkStore>,
    pub bulk: BulkEngine,
    pub sessions: SessionIssuer,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(store: Arc<dyn LinkStore>, config: &Config) -> Self {
        Self {
            bulk: BulkEngine::new(Arc::clone(&store)),
            store,
            sessions: SessionIssuer::new(&config.session.cookie_name, config.session.id_length),
            request_timeout: Duration::from_secs(config.server.request_timeout_secs),
            max_body_bytes: config.server.max_body_bytes,
        }
    }

    fn begin(&self, headers: &HeaderMap) -> StageResult<Exchange<SessionAssigned>> {
        Exchange::start(&self.sessions, headers, self.request_timeout)
    }
}

fn require_url(url: String) -> StageResult<String> {
    let url = url.trim().to_string();
    if url.is_empty() {
        return Err(PipelineError::Validation("URL cannot be empty".to_string()));
    }
    Ok(url)
}

/// Create (or find) the short link and pick 201 or 409.
async fn shorten(store: &dyn LinkStore, call: StoreCall<String>) -> StageResult<(StatusCode, String)> {
    let shortened = store
        .create(&call.ctx, &call.payload, &call.user_id)
        .await?;

    let status = if shortened.created {
        tracing::info!(key = %shortened.key, owner = %call.user_id, "short link created");
        StatusCode::CREATED
    } else {
        tracing::debug!(key = %shortened.key, "target already shortened");
        StatusCode::CONFLICT
    };

    Ok((status, store.short_url(&shortened.key)))
}

/// POST / with the URL as a raw body
pub async fn shorten_plain(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let exchange = match state.begin(&headers) {
        Ok(exchange) => exchange,
        Err(e) => return e.into_response(),
    };

    exchange
        .run(|exchange| async move {
            let resolved = exchange
                .read_body(body, state.max_body_bytes)
                .await?
                .decode_plain()?
                .invoke(|call| shorten(state.store.as_ref(), call))
                .await?;
            Ok::<_, PipelineError>(resolved.encode_plain().send())
        })
        .await
}

/// POST /api/shorten with `{"url": "..."}`
pub async fn shorten_json(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let exchange = match state.begin(&headers) {
        Ok(exchange) => exchange,
        Err(e) => return e.into_response(),
    };

    exchange
        .run(|exchange| async move {
            let resolved = exchange
                .read_body(body, state.max_body_bytes)
                .await?
                .decode_json::<ShortenRequest>()?
                .map(|request| require_url(request.url))?
                .invoke(|call| shorten(state.store.as_ref(), call))
                .await?;
            Ok::<_, PipelineError>(resolved.envelope().encode_json()?.send())
        })
        .await
}

/// GET /api/user/urls
pub async fn list_user_urls(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let exchange = match state.begin(&headers) {
        Ok(exchange) => exchange,
        Err(e) => return e.into_response(),
    };

    exchange
        .run(|exchange| async move {
            let resolved = exchange
                .without_body()
                .invoke(|call| async move {
                    match state.store.list_by_owner(&call.ctx, &call.user_id).await {
                        Ok(links) => {
                            let urls: Vec<UserUrl> = links
                                .into_iter()
                                .map(|link| UserUrl {
                                    short_url: state.store.short_url(&link.key),
                                    original_url: link.target,
                                })
                                .collect();
                            Ok((StatusCode::OK, urls))
                        }
                        Err(StorageError::NotFound) => Ok((StatusCode::NO_CONTENT, Vec::new())),
                        Err(e) => Err(PipelineError::from(e)),
                    }
                })
                .await?;

            let encoded = if resolved.status() == StatusCode::NO_CONTENT {
                resolved.encode_empty()
            } else {
                resolved.encode_json()?
            };
            Ok::<_, PipelineError>(encoded.send())
        })
        .await
}

/// POST /api/shorten/batch
pub async fn shorten_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let exchange = match state.begin(&headers) {
        Ok(exchange) => exchange,
        Err(e) => return e.into_response(),
    };

    exchange
        .run(|exchange| async move {
            let resolved = exchange
                .read_body(body, state.max_body_bytes)
                .await?
                .decode_json::<Vec<BatchItem>>()?
                .map(|items| {
                    items
                        .into_iter()
                        .map(|item| -> StageResult<BatchItem> {
                            Ok(BatchItem {
                                original_url: require_url(item.original_url)?,
                                correlation_id: item.correlation_id,
                            })
                        })
                        .collect::<StageResult<Vec<BatchItem>>>()
                })?
                .invoke(|call| async move {
                    let results: Vec<ResultItem> = state
                        .bulk
                        .batch(&call.ctx, &call.payload, &call.user_id)
                        .await?;
                    Ok::<_, PipelineError>((StatusCode::CREATED, results))
                })
                .await?;
            Ok::<_, PipelineError>(resolved.encode_json()?.send())
        })
        .await
}

/// DELETE /api/user/urls with a JSON array of keys
pub async fn delete_user_urls(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let exchange = match state.begin(&headers) {
        Ok(exchange) => exchange,
        Err(e) => return e.into_response(),
    };

    exchange
        .run(|exchange| async move {
            let resolved = exchange
                .read_body(body, state.max_body_bytes)
                .await?
                .decode_json::<Vec<String>>()?
                .invoke(|call| async move {
                    state
                        .bulk
                        .delete(&call.ctx, call.payload, &call.user_id)
                        .await?;
                    Ok::<_, PipelineError>((StatusCode::ACCEPTED, ()))
                })
                .await?;
            Ok::<_, PipelineError>(resolved.encode_empty().send())
        })
        .await
}
