//! In-memory credential store for tests and local development.
//!
//! A single mutex guards each table, so the conditional consume inside
//! [`rotate_refresh_token`](super::CredentialStore::rotate_refresh_token)
//! is atomic the same way the Postgres transaction is. Data is lost when
//! the process exits.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{ApiKey, ApiKeyUpdate, RefreshToken};
use crate::error::{AuthError, Result};

use super::CredentialStore;

#[derive(Default)]
pub struct MemoryStore {
    tokens: Mutex<HashMap<Uuid, RefreshToken>>,
    keys: Mutex<HashMap<Uuid, ApiKey>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        let mut tokens = self.tokens.lock();
        if tokens.values().any(|t| t.token_hash == token.token_hash) {
            return Err(AuthError::Conflict);
        }
        tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        let tokens = self.tokens.lock();
        Ok(tokens.values().find(|t| t.token_hash == token_hash).cloned())
    }

    async fn rotate_refresh_token(
        &self,
        consumed_id: Uuid,
        successor: &RefreshToken,
    ) -> Result<bool> {
        let mut tokens = self.tokens.lock();
        match tokens.get_mut(&consumed_id) {
            Some(row) if row.revoked_at.is_none() => {
                row.revoked_at = Some(OffsetDateTime::now_utc());
            }
            _ => return Ok(false),
        }
        tokens.insert(successor.id, successor.clone());
        Ok(true)
    }

    async fn revoke_family(&self, family_id: Uuid) -> Result<u64> {
        let mut tokens = self.tokens.lock();
        let now = OffsetDateTime::now_utc();
        let mut revoked = 0;
        for row in tokens.values_mut() {
            if row.family_id == family_id && row.revoked_at.is_none() {
                row.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<u64> {
        let mut tokens = self.tokens.lock();
        let now = OffsetDateTime::now_utc();
        let mut revoked = 0;
        for row in tokens.values_mut() {
            if row.token_hash == token_hash && row.revoked_at.is_none() {
                row.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64> {
        let mut tokens = self.tokens.lock();
        let now = OffsetDateTime::now_utc();
        let mut revoked = 0;
        for row in tokens.values_mut() {
            if row.user_id == user_id && row.revoked_at.is_none() {
                row.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn delete_expired_tokens(&self) -> Result<u64> {
        let mut tokens = self.tokens.lock();
        let now = OffsetDateTime::now_utc();
        let before = tokens.len();
        tokens.retain(|_, row| row.expires_at > now);
        Ok((before - tokens.len()) as u64)
    }

    async fn insert_api_key(&self, key: &ApiKey) -> Result<()> {
        let mut keys = self.keys.lock();
        let duplicate = keys.values().any(|k| {
            k.key_hash == key.key_hash
                || (k.user_id == key.user_id && k.key_name == key.key_name)
        });
        if duplicate {
            return Err(AuthError::Conflict);
        }
        keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn find_api_keys_by_prefix(&self, key_prefix: &str) -> Result<Vec<ApiKey>> {
        let keys = self.keys.lock();
        Ok(keys
            .values()
            .filter(|k| k.key_prefix == key_prefix)
            .cloned()
            .collect())
    }

    async fn list_api_keys(&self, user_id: Uuid) -> Result<Vec<ApiKey>> {
        let keys = self.keys.lock();
        let mut out: Vec<ApiKey> = keys
            .values()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn update_api_key(
        &self,
        id: Uuid,
        user_id: Uuid,
        update: &ApiKeyUpdate,
    ) -> Result<Option<ApiKey>> {
        let mut keys = self.keys.lock();
        if let Some(name) = &update.key_name {
            let taken = keys
                .values()
                .any(|k| k.user_id == user_id && k.key_name == *name && k.id != id);
            if taken {
                return Err(AuthError::Conflict);
            }
        }
        let Some(key) = keys.get_mut(&id).filter(|k| k.user_id == user_id) else {
            return Ok(None);
        };
        if let Some(name) = &update.key_name {
            key.key_name = name.clone();
        }
        if let Some(active) = update.is_active {
            key.is_active = active;
        }
        if let Some(expires_at) = update.expires_at {
            key.expires_at = Some(expires_at);
        }
        if let Some(limit) = update.rate_limit_per_minute {
            key.rate_limit_per_minute = limit;
        }
        if let Some(scopes) = &update.scopes {
            key.scopes = scopes.clone();
        }
        key.updated_at = OffsetDateTime::now_utc();
        Ok(Some(key.clone()))
    }

    async fn delete_api_key(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut keys = self.keys.lock();
        match keys.get(&id) {
            Some(key) if key.user_id == user_id => {
                keys.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch_api_key_last_used(&self, id: Uuid) -> Result<()> {
        let mut keys = self.keys.lock();
        if let Some(key) = keys.get_mut(&id) {
            key.last_used_at = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn token_row(family_id: Uuid, hash: &str) -> RefreshToken {
        let now = OffsetDateTime::now_utc();
        RefreshToken {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            token_hash: hash.to_string(),
            family_id,
            expires_at: now + Duration::days(30),
            revoked_at: None,
            created_at: now,
            user_agent: None,
            ip: None,
        }
    }

    #[tokio::test]
    async fn rotate_consumes_exactly_once() {
        let store = MemoryStore::new();
        let family = Uuid::new_v4();
        let parent = token_row(family, "h1");
        store.insert_refresh_token(&parent).await.unwrap();

        let first = token_row(family, "h2");
        assert!(store.rotate_refresh_token(parent.id, &first).await.unwrap());

        // The parent is already consumed; a second rotation must fail and
        // must not insert its successor.
        let second = token_row(family, "h3");
        assert!(!store.rotate_refresh_token(parent.id, &second).await.unwrap());
        assert!(store.find_refresh_token("h3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_key_name_per_user_rejected() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let mk = |name: &str, hash: &str| ApiKey {
            id: Uuid::new_v4(),
            user_id,
            tenant_id: Uuid::new_v4(),
            key_name: name.into(),
            key_prefix: "vz_00000000".into(),
            key_hash: hash.into(),
            scopes: vec!["metrics:write".into()],
            is_active: true,
            rate_limit_per_minute: 60,
            expires_at: None,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_api_key(&mk("ci", "a")).await.unwrap();
        assert!(matches!(
            store.insert_api_key(&mk("ci", "b")).await,
            Err(AuthError::Conflict)
        ));
    }
}
