use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::domain::ApiKey;
use crate::error::AuthError;
use crate::security::api_keys::{extract_credential, KeySource};
use crate::state::AppState;

/// Ingestion-path authentication: extracts the API key credential,
/// validates it and applies the per-key throttle before the request
/// reaches any handler. The validated key is exposed as an extension for
/// scope checks downstream.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let query = req.uri().query().map(|q| q.to_string());
    let Some((candidate, source)) = extract_credential(req.headers(), query.as_deref()) else {
        return Err(AuthError::Authentication);
    };

    if source == KeySource::QueryParam {
        tracing::warn!(
            path = %req.uri().path(),
            "API key passed via query parameter; use the X-API-Key header instead"
        );
    }

    let key = state.api_keys.validate(&candidate).await?;

    if !state
        .limiter
        .check(&key.id.to_string(), key.rate_limit_per_minute.max(1) as u32)
    {
        return Err(AuthError::RateLimited);
    }

    req.extensions_mut().insert(key);
    Ok(next.run(req).await)
}

/// Scope gate layered inside `require_api_key`. Produces 403 for a valid
/// key lacking the scope, as opposed to the 401s produced upstream.
pub async fn enforce_scope(
    req: Request,
    next: Next,
    scope: &'static str,
) -> Result<Response, AuthError> {
    let key = req
        .extensions()
        .get::<ApiKey>()
        .cloned()
        .ok_or(AuthError::Authentication)?;
    if !key.has_scope(scope) {
        return Err(AuthError::Authorization {
            scope: scope.to_string(),
        });
    }
    Ok(next.run(req).await)
}
