use std::sync::Arc;

use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;

use crate::domain::ApiKey;
use crate::error::AuthError;
use crate::middleware::api_key::{enforce_scope, require_api_key};
use crate::state::AppState;

/// Ingestion surface. The event payload is opaque here; this subsystem
/// only decides whether the request may pass.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/ingest",
            post(ingest)
                .route_layer(from_fn(|req, next| enforce_scope(req, next, "metrics:write"))),
        )
        .route(
            "/export",
            get(export)
                .route_layer(from_fn(|req, next| enforce_scope(req, next, "metrics:read"))),
        )
        .route_layer(from_fn_with_state(state, require_api_key))
}

async fn ingest(
    State(_state): State<Arc<AppState>>,
    Extension(key): Extension<ApiKey>,
    Json(events): Json<Value>,
) -> Result<(StatusCode, Json<Value>), AuthError> {
    let count = events.as_array().map_or(1, |a| a.len());
    tracing::debug!(tenant_id = %key.tenant_id, api_key_id = %key.id, count, "events accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "accepted": count })),
    ))
}

async fn export(
    State(_state): State<Arc<AppState>>,
    Extension(key): Extension<ApiKey>,
) -> Result<Json<Value>, AuthError> {
    tracing::debug!(tenant_id = %key.tenant_id, api_key_id = %key.id, "export requested");
    Ok(Json(serde_json::json!({ "series": [] })))
}
