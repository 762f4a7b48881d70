use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::compression::{predicate::SizeAbove, CompressionLayer};
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;

use crate::redirect::create_redirect_router;

use super::handlers::{
    delete_user_urls, list_user_urls, shorten_batch, shorten_json, shorten_plain, AppState,
};

/// Full application router: shortening API plus redirects.
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/", post(shorten_plain))
        .route("/api/shorten", post(shorten_json))
        .route("/api/shorten/batch", post(shorten_batch))
        .route("/api/user/urls", get(list_user_urls).delete(delete_user_urls))
        // Any non-empty body is gzipped when the client accepts it
        .layer(CompressionLayer::new().compress_when(SizeAbove::new(1)))
        .layer(RequestDecompressionLayer::new())
        .with_state(Arc::clone(&state));

    Router::new()
        .merge(api_routes)
        .merge(create_redirect_router(state))
        .layer(TraceLayer::new_for_http())
}
