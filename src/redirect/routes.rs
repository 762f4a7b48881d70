use axum::{routing::get, Router};
use std::sync::Arc;

use crate::api::AppState;

use super::handlers::{ping, redirect_url};

pub fn create_redirect_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/{key}", get(redirect_url))
        .with_state(state)
}
