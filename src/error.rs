use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthError>;

/// Error taxonomy for the credential core.
///
/// Authentication failures are deliberately indistinguishable from one
/// another: an unknown secret, an expired secret and a malformed secret all
/// surface the same way so callers cannot probe which credentials exist.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    Authentication,

    /// Token reuse detected. The whole family has already been revoked by
    /// the time this error is returned; the caller must re-authenticate.
    #[error("session compromised; re-authentication required")]
    Security,

    #[error("missing required scope: {scope}")]
    Authorization { scope: String },

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("resource already exists")]
    Conflict,

    #[error("resource not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Authentication | AuthError::Security => StatusCode::UNAUTHORIZED,
            AuthError::Authorization { .. } => StatusCode::FORBIDDEN,
            AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::Conflict => StatusCode::CONFLICT,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::Storage(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code. Clients use `SESSION_COMPROMISED` to
    /// discard every locally held credential before re-authenticating.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Authentication => "AUTHENTICATION_FAILED",
            AuthError::Security => "SESSION_COMPROMISED",
            AuthError::Authorization { .. } => "MISSING_SCOPE",
            AuthError::RateLimited => "RATE_LIMITED",
            AuthError::Validation(_) => "INVALID_REQUEST",
            AuthError::Conflict => "CONFLICT",
            AuthError::NotFound => "NOT_FOUND",
            AuthError::Storage(_) | AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (
            status,
            Json(ErrorBody {
                error: message,
                code: self.code(),
            }),
        )
            .into_response()
    }
}
