use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Stored API key metadata. The secret itself is never persisted; only
/// `key_prefix` (non-secret, used for candidate lookup and display) and
/// `key_hash` (one-way digest of the full secret) are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub key_name: String,
    pub key_prefix: String,
    pub key_hash: String,
    pub scopes: Vec<String>,
    pub is_active: bool,
    pub rate_limit_per_minute: i32,
    pub expires_at: Option<OffsetDateTime>,
    pub last_used_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ApiKey {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// Owner-editable fields. `None` leaves the column unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiKeyUpdate {
    pub key_name: Option<String>,
    pub is_active: Option<bool>,
    pub expires_at: Option<OffsetDateTime>,
    pub rate_limit_per_minute: Option<i32>,
    pub scopes: Option<Vec<String>>,
}
