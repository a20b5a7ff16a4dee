use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use cookie::Cookie;

use crate::error::AuthError;
use crate::state::AppState;

/// Session authentication for the management surface (key CRUD,
/// logout-all). Accepts the access token from the `Authorization` header
/// or the access cookie and exposes the verified claims as an extension.
pub async fn session_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if let Some(token) = bearer_from_header(req.headers()) {
        if let Ok(claims) = state.jwt.verify(&token) {
            req.extensions_mut().insert(claims);
            return Ok(next.run(req).await);
        }
    }

    if let Some(token) = cookie_token(req.headers(), &state.security.access_cookie_name) {
        if let Ok(claims) = state.jwt.verify(&token) {
            req.extensions_mut().insert(claims);
            return Ok(next.run(req).await);
        }
    }

    Err(AuthError::Authentication)
}

fn bearer_from_header(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

fn cookie_token(headers: &axum::http::HeaderMap, name: &str) -> Option<String> {
    let cookie_header = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        if let Ok(parsed) = Cookie::parse(part.trim().to_string()) {
            if parsed.name() == name {
                return Some(parsed.value().to_string());
            }
        }
    }
    None
}
