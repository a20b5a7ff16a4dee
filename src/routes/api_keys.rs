use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{ApiKey, ApiKeyUpdate};
use crate::error::AuthError;
use crate::middleware;
use crate::security::api_keys::GenerateOptions;
use crate::security::jwt::Claims;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/keys", post(create_key))
        .route("/keys", get(list_keys))
        .route("/keys/:id", patch(update_key))
        .route("/keys/:id", delete(delete_key))
        .route_layer(from_fn_with_state(state, middleware::auth::session_auth))
}

#[derive(Deserialize)]
struct CreateKeyPayload {
    name: String,
    scopes: Option<Vec<String>>,
    rate_limit_per_minute: Option<i32>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    expires_at: Option<OffsetDateTime>,
}

#[derive(Serialize)]
struct CreatedKeyResponse {
    id: Uuid,
    name: String,
    /// Full secret. Shown exactly once; only a hash is retained.
    key: String,
    key_prefix: String,
    scopes: Vec<String>,
    rate_limit_per_minute: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

/// Masked listing view: prefix only, never the secret or its hash.
#[derive(Serialize)]
struct KeySummary {
    id: Uuid,
    name: String,
    key_prefix: String,
    scopes: Vec<String>,
    is_active: bool,
    rate_limit_per_minute: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    last_used_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl From<ApiKey> for KeySummary {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            name: key.key_name,
            key_prefix: key.key_prefix,
            scopes: key.scopes,
            is_active: key.is_active,
            rate_limit_per_minute: key.rate_limit_per_minute,
            expires_at: key.expires_at,
            last_used_at: key.last_used_at,
            created_at: key.created_at,
        }
    }
}

fn owner(claims: &Claims) -> Result<(Uuid, Uuid), AuthError> {
    let user_id = claims.sub.parse().map_err(|_| AuthError::Authentication)?;
    let tenant_id = claims
        .tenant
        .parse()
        .map_err(|_| AuthError::Authentication)?;
    Ok((user_id, tenant_id))
}

async fn create_key(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateKeyPayload>,
) -> Result<(StatusCode, Json<CreatedKeyResponse>), AuthError> {
    let (user_id, tenant_id) = owner(&claims)?;
    let generated = state
        .api_keys
        .generate(
            user_id,
            tenant_id,
            &payload.name,
            GenerateOptions {
                scopes: payload.scopes,
                rate_limit_per_minute: payload.rate_limit_per_minute,
                expires_at: payload.expires_at,
            },
        )
        .await?;

    let record = generated.record;
    Ok((
        StatusCode::CREATED,
        Json(CreatedKeyResponse {
            id: record.id,
            name: record.key_name,
            key: generated.plaintext,
            key_prefix: record.key_prefix,
            scopes: record.scopes,
            rate_limit_per_minute: record.rate_limit_per_minute,
            expires_at: record.expires_at,
            created_at: record.created_at,
        }),
    ))
}

async fn list_keys(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<KeySummary>>, AuthError> {
    let (user_id, _) = owner(&claims)?;
    let keys = state.api_keys.list(user_id).await?;
    Ok(Json(keys.into_iter().map(KeySummary::from).collect()))
}

#[derive(Deserialize)]
struct UpdateKeyPayload {
    name: Option<String>,
    is_active: Option<bool>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    expires_at: Option<OffsetDateTime>,
    rate_limit_per_minute: Option<i32>,
    scopes: Option<Vec<String>>,
}

async fn update_key(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateKeyPayload>,
) -> Result<Json<KeySummary>, AuthError> {
    let (user_id, _) = owner(&claims)?;
    let update = ApiKeyUpdate {
        key_name: payload.name,
        is_active: payload.is_active,
        expires_at: payload.expires_at,
        rate_limit_per_minute: payload.rate_limit_per_minute,
        scopes: payload.scopes,
    };
    let updated = state
        .api_keys
        .update(id, user_id, &update)
        .await?
        .ok_or(AuthError::NotFound)?;
    Ok(Json(KeySummary::from(updated)))
}

async fn delete_key(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AuthError> {
    let (user_id, _) = owner(&claims)?;
    if state.api_keys.delete(id, user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AuthError::NotFound)
    }
}
