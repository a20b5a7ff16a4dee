use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

mod api_keys;
mod auth;
mod ingest;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .merge(auth::router(state.clone()))
        .merge(api_keys::router(state.clone()))
        .merge(ingest::router(state))
        .route("/health", get(|| async { "OK" }))
}
