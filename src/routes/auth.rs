use std::sync::Arc;

use axum::extract::{Extension, State};
use axum::http::header::SET_COOKIE;
use axum::http::HeaderMap;
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use cookie::time::Duration as CookieDuration;
use cookie::Cookie;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthError;
use crate::middleware;
use crate::security::jwt::Claims;
use crate::security::password;
use crate::security::tokens::SessionContext;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route(
            "/auth/logout-all",
            post(logout_all).route_layer(from_fn_with_state(
                state,
                middleware::auth::session_auth,
            )),
        )
}

#[derive(Deserialize)]
struct RegisterPayload {
    email: String,
    password: String,
    name: Option<String>,
}

#[derive(Serialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
}

fn validate_email(email: &str) -> bool {
    email.contains('@') && email.len() <= 255
}

fn validate_password(password: &str) -> bool {
    password.len() >= 12
}

fn session_context(headers: &HeaderMap) -> SessionContext {
    SessionContext {
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
        ip: extract_ip(headers),
    }
}

fn extract_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn throttle_by_ip(state: &AppState, headers: &HeaderMap, limit: u32) -> Result<(), AuthError> {
    if let Some(ip) = extract_ip(headers) {
        if !state.limiter.check(&ip, limit) {
            return Err(AuthError::RateLimited);
        }
    }
    Ok(())
}

async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<RegisterPayload>,
) -> Result<Response, AuthError> {
    throttle_by_ip(&state, &headers, 20)?;
    if !validate_email(&payload.email) {
        return Err(AuthError::Validation("invalid email".into()));
    }
    if !validate_password(&payload.password) {
        return Err(AuthError::Validation(
            "password too weak (min 12 chars)".into(),
        ));
    }

    let hash = password::hash_password(&payload.password)
        .map_err(|e| AuthError::Internal(e.to_string()))?;
    let user_id = Uuid::new_v4();
    // Each signup starts its own tenant; invitations into an existing
    // tenant are handled by the workspace service, not here.
    let tenant_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO users (id, tenant_id, email, password_hash, name, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, now(), now())",
    )
    .bind(user_id)
    .bind(tenant_id)
    .bind(&payload.email)
    .bind(&hash)
    .bind(&payload.name)
    .execute(&state.db)
    .await
    .map_err(map_db_error)?;

    let issued = state
        .tokens
        .issue(user_id, tenant_id, session_context(&headers))
        .await?;
    Ok(token_response(issued.access_token, issued.refresh_token, &state))
}

#[derive(Deserialize)]
struct LoginPayload {
    email: String,
    password: String,
}

async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<LoginPayload>,
) -> Result<Response, AuthError> {
    throttle_by_ip(&state, &headers, 30)?;
    if !validate_email(&payload.email) {
        return Err(AuthError::Validation("invalid email".into()));
    }

    let user = state
        .provider
        .authenticate(&state.db, &payload.email, &payload.password)
        .await?;

    let issued = state
        .tokens
        .issue(user.id, user.tenant_id, session_context(&headers))
        .await?;
    Ok(token_response(issued.access_token, issued.refresh_token, &state))
}

#[derive(Deserialize)]
struct RefreshPayload {
    refresh_token: String,
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<RefreshPayload>,
) -> Result<Response, AuthError> {
    throttle_by_ip(&state, &headers, 60)?;
    let issued = state
        .tokens
        .rotate(&payload.refresh_token, session_context(&headers))
        .await?;
    Ok(token_response(issued.access_token, issued.refresh_token, &state))
}

#[derive(Deserialize)]
struct LogoutPayload {
    refresh_token: Option<String>,
}

async fn logout(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LogoutPayload>,
) -> Result<Response, AuthError> {
    if let Some(rt) = payload.refresh_token {
        state.tokens.logout(&rt).await?;
    }
    let mut res = Json(serde_json::json!({ "logged_out": true })).into_response();
    clear_cookies(&mut res, &state);
    Ok(res)
}

#[derive(Serialize)]
struct LogoutAllResponse {
    revoked_sessions: u64,
}

async fn logout_all(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Response, AuthError> {
    let user_id: Uuid = claims
        .sub
        .parse()
        .map_err(|_| AuthError::Authentication)?;
    let revoked = state.tokens.logout_all(user_id).await?;
    let mut res = Json(LogoutAllResponse {
        revoked_sessions: revoked,
    })
    .into_response();
    clear_cookies(&mut res, &state);
    Ok(res)
}

fn map_db_error(err: sqlx::Error) -> AuthError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.constraint().is_some() {
            return AuthError::Conflict;
        }
    }
    AuthError::Storage(err)
}

fn token_response(access: String, refresh: String, state: &Arc<AppState>) -> Response {
    let body = Json(TokenResponse {
        access_token: access.clone(),
        refresh_token: refresh.clone(),
    });
    let mut res = body.into_response();
    attach_cookies(&mut res, state, &access, &refresh);
    res
}

fn attach_cookies(res: &mut Response, state: &Arc<AppState>, access: &str, refresh: &str) {
    let cfg = &state.security;
    let access_cookie = Cookie::build((cfg.access_cookie_name.clone(), access.to_string()))
        .http_only(true)
        .secure(cfg.secure_cookies)
        .same_site(cfg.same_site)
        .max_age(CookieDuration::minutes(cfg.access_ttl_minutes))
        .path("/")
        .build()
        .to_string();
    let refresh_cookie = Cookie::build((cfg.refresh_cookie_name.clone(), refresh.to_string()))
        .http_only(true)
        .secure(cfg.secure_cookies)
        .same_site(cfg.same_site)
        .max_age(CookieDuration::days(cfg.refresh_ttl_days))
        .path("/")
        .build()
        .to_string();
    if let Ok(value) = access_cookie.parse() {
        res.headers_mut().append(SET_COOKIE, value);
    }
    if let Ok(value) = refresh_cookie.parse() {
        res.headers_mut().append(SET_COOKIE, value);
    }
}

fn clear_cookies(res: &mut Response, state: &Arc<AppState>) {
    let cfg = &state.security;
    for name in [&cfg.access_cookie_name, &cfg.refresh_cookie_name] {
        let cookie = Cookie::build((name.clone(), ""))
            .http_only(true)
            .secure(cfg.secure_cookies)
            .same_site(cfg.same_site)
            .max_age(CookieDuration::seconds(0))
            .path("/")
            .build()
            .to_string();
        if let Ok(value) = cookie.parse() {
            res.headers_mut().append(SET_COOKIE, value);
        }
    }
}
