//! API key generation, validation and scoped authorization for machine
//! and SDK ingestion.
//!
//! Keys carry the literal `vz_` tag so they are recognizable at a glance
//! and in logs. The stored record keeps only the short prefix (for
//! indexed candidate lookup) and a SHA-256 digest of the full secret; the
//! plaintext is shown to the caller exactly once at creation.

use std::sync::Arc;

use axum::http::HeaderMap;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{ApiKey, ApiKeyUpdate};
use crate::error::{AuthError, Result};
use crate::store::CredentialStore;

/// Literal tag every key starts with.
pub const KEY_TAG: &str = "vz_";
/// Tag plus eight hex characters; stored and shown for identification.
const PREFIX_LEN: usize = KEY_TAG.len() + 8;
const SECRET_BYTES: usize = 32;

pub const DEFAULT_SCOPE: &str = "metrics:write";
const MAX_NAME_LEN: usize = 100;

/// Where the credential was found in the request; the query parameter is
/// a discouraged fallback and is logged by the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Header,
    Bearer,
    QueryParam,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub scopes: Option<Vec<String>>,
    pub rate_limit_per_minute: Option<i32>,
    pub expires_at: Option<OffsetDateTime>,
}

pub struct GeneratedKey {
    pub record: ApiKey,
    /// Full secret; returned to the caller once and never recoverable.
    pub plaintext: String,
}

#[derive(Clone)]
pub struct ApiKeyService {
    store: Arc<dyn CredentialStore>,
    default_rate_limit: i32,
}

impl ApiKeyService {
    pub fn new(store: Arc<dyn CredentialStore>, default_rate_limit: i32) -> Self {
        Self {
            store,
            default_rate_limit,
        }
    }

    pub async fn generate(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        key_name: &str,
        opts: GenerateOptions,
    ) -> Result<GeneratedKey> {
        let key_name = key_name.trim();
        if key_name.is_empty() || key_name.len() > MAX_NAME_LEN {
            return Err(AuthError::Validation("invalid key name".into()));
        }
        let mut scopes = opts
            .scopes
            .unwrap_or_else(|| vec![DEFAULT_SCOPE.to_string()]);
        scopes.retain(|s| !s.trim().is_empty());
        scopes.sort();
        scopes.dedup();
        if scopes.is_empty() {
            return Err(AuthError::Validation("at least one scope required".into()));
        }
        let rate_limit = opts.rate_limit_per_minute.unwrap_or(self.default_rate_limit);
        if rate_limit < 1 {
            return Err(AuthError::Validation(
                "rate_limit_per_minute must be positive".into(),
            ));
        }

        let plaintext = generate_secret();
        let now = OffsetDateTime::now_utc();
        let record = ApiKey {
            id: Uuid::new_v4(),
            user_id,
            tenant_id,
            key_name: key_name.to_string(),
            key_prefix: plaintext[..PREFIX_LEN].to_string(),
            key_hash: hash_api_key(&plaintext),
            scopes,
            is_active: true,
            rate_limit_per_minute: rate_limit,
            expires_at: opts.expires_at,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_api_key(&record).await?;
        Ok(GeneratedKey { record, plaintext })
    }

    /// Validates a presented secret against the stored candidates sharing
    /// its prefix. Digest comparison is constant-time so a near-match
    /// leaks nothing about how far it matched.
    pub async fn validate(&self, presented: &str) -> Result<ApiKey> {
        let presented = presented.trim();
        if !presented.starts_with(KEY_TAG) {
            return Err(AuthError::Authentication);
        }
        let Some(prefix) = presented.get(..PREFIX_LEN) else {
            return Err(AuthError::Authentication);
        };

        let candidates = self.store.find_api_keys_by_prefix(prefix).await?;
        let digest = hash_api_key(presented);
        let now = OffsetDateTime::now_utc();

        for key in candidates {
            if digest.as_bytes().ct_eq(key.key_hash.as_bytes()).into() {
                if !key.is_active || key.is_expired(now) {
                    return Err(AuthError::Authentication);
                }
                self.touch_last_used(key.id);
                return Ok(key);
            }
        }
        Err(AuthError::Authentication)
    }

    pub fn require_scope(&self, key: &ApiKey, scope: &str) -> Result<()> {
        if key.has_scope(scope) {
            Ok(())
        } else {
            Err(AuthError::Authorization {
                scope: scope.to_string(),
            })
        }
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<ApiKey>> {
        self.store.list_api_keys(user_id).await
    }

    pub async fn update(
        &self,
        id: Uuid,
        user_id: Uuid,
        update: &ApiKeyUpdate,
    ) -> Result<Option<ApiKey>> {
        if let Some(name) = &update.key_name {
            let name = name.trim();
            if name.is_empty() || name.len() > MAX_NAME_LEN {
                return Err(AuthError::Validation("invalid key name".into()));
            }
        }
        if let Some(limit) = update.rate_limit_per_minute {
            if limit < 1 {
                return Err(AuthError::Validation(
                    "rate_limit_per_minute must be positive".into(),
                ));
            }
        }
        if let Some(scopes) = &update.scopes {
            if scopes.iter().all(|s| s.trim().is_empty()) {
                return Err(AuthError::Validation("at least one scope required".into()));
            }
        }
        self.store.update_api_key(id, user_id, update).await
    }

    pub async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        self.store.delete_api_key(id, user_id).await
    }

    /// Off the critical path: losing or reordering these updates under
    /// load is tolerated.
    fn touch_last_used(&self, id: Uuid) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(err) = store.touch_api_key_last_used(id).await {
                tracing::debug!(error = %err, api_key_id = %id, "last_used_at update dropped");
            }
        });
    }
}

/// Pulls the API key credential out of a request, in priority order:
/// dedicated header, `Bearer` token carrying the `vz_` tag, then the
/// `api_key` query parameter.
pub fn extract_credential(headers: &HeaderMap, query: Option<&str>) -> Option<(String, KeySource)> {
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if !value.is_empty() {
            return Some((value.to_string(), KeySource::Header));
        }
    }

    if let Some(token) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
    {
        // Only claim bearer tokens that look like API keys; session JWTs
        // travel through the same header.
        if token.starts_with(KEY_TAG) {
            return Some((token.to_string(), KeySource::Bearer));
        }
    }

    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some((name, value)) = pair.split_once('=') {
                if name == "api_key" && !value.is_empty() {
                    return Some((value.to_string(), KeySource::QueryParam));
                }
            }
        }
    }

    None
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("{KEY_TAG}{}", hex::encode(bytes))
}

pub fn hash_api_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}
