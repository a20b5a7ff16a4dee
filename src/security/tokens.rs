//! Session-token lifecycle: issuance, rotation-on-use, reuse detection.
//!
//! Refresh tokens are single-use by construction. Each login starts a new
//! family; every rotation consumes the presented token and issues its
//! successor inside the same family. Presenting an already-consumed token
//! (stolen-then-replayed, or the loser of a concurrent race) compromises
//! the whole family: every descendant is revoked before the error is
//! returned.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::domain::RefreshToken;
use crate::error::{AuthError, Result};
use crate::security::jwt::JwtManager;
use crate::store::CredentialStore;

pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub family_id: Uuid,
}

/// Request metadata recorded on each refresh-token row.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn CredentialStore>,
    jwt: JwtManager,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(store: Arc<dyn CredentialStore>, jwt: JwtManager, refresh_ttl_days: i64) -> Self {
        Self {
            store,
            jwt,
            refresh_ttl: Duration::days(refresh_ttl_days),
        }
    }

    /// Mints an access/refresh pair and starts a new token family. Called
    /// on login and signup.
    pub async fn issue(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        ctx: SessionContext,
    ) -> Result<IssuedTokens> {
        let family_id = Uuid::new_v4();
        let (refresh_token, row) = self.new_refresh_row(user_id, tenant_id, family_id, ctx);
        self.store.insert_refresh_token(&row).await?;
        let access_token = self.mint_access(user_id, tenant_id)?;
        Ok(IssuedTokens {
            access_token,
            refresh_token,
            family_id,
        })
    }

    /// Validates the presented refresh secret, consumes it and issues its
    /// successor in the same family.
    ///
    /// An unknown secret and an expired one fail identically. A revoked
    /// secret, or losing the conditional consume to a concurrent call on
    /// the same secret, compromises the family: an attacker racing two
    /// uses of a stolen token is indistinguishable from the benign race,
    /// so both revoke everything.
    pub async fn rotate(&self, presented: &str, ctx: SessionContext) -> Result<IssuedTokens> {
        let hash = hash_refresh_secret(presented);
        let Some(row) = self.store.find_refresh_token(&hash).await? else {
            return Err(AuthError::Authentication);
        };

        let now = OffsetDateTime::now_utc();
        if row.is_expired(now) {
            return Err(AuthError::Authentication);
        }

        if row.is_revoked() {
            self.compromise_family(&row, "revoked token re-presented").await?;
            return Err(AuthError::Security);
        }

        let (refresh_token, successor) =
            self.new_refresh_row(row.user_id, row.tenant_id, row.family_id, ctx);
        let consumed = self.store.rotate_refresh_token(row.id, &successor).await?;
        if !consumed {
            self.compromise_family(&row, "lost conditional consume to concurrent rotation")
                .await?;
            return Err(AuthError::Security);
        }

        let access_token = self.mint_access(row.user_id, row.tenant_id)?;
        Ok(IssuedTokens {
            access_token,
            refresh_token,
            family_id: row.family_id,
        })
    }

    /// Revokes the single presented token. Best-effort: an unknown or
    /// already-revoked token is not an error.
    pub async fn logout(&self, presented: &str) -> Result<()> {
        let hash = hash_refresh_secret(presented);
        self.store.revoke_refresh_token(&hash).await?;
        Ok(())
    }

    /// Revokes every refresh token for the user across all families, for
    /// full session invalidation (password change, "log out everywhere").
    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64> {
        self.store.revoke_all_for_user(user_id).await
    }

    /// Family-wide revocation plus the audit event. Callers return
    /// [`AuthError::Security`] afterwards; the side effect always happens
    /// before the error reaches the client.
    async fn compromise_family(&self, row: &RefreshToken, reason: &str) -> Result<()> {
        let revoked = self.store.revoke_family(row.family_id).await?;
        tracing::warn!(
            family_id = %row.family_id,
            user_id = %row.user_id,
            revoked_tokens = revoked,
            reason,
            "refresh token reuse detected; family revoked"
        );
        Ok(())
    }

    fn new_refresh_row(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        family_id: Uuid,
        ctx: SessionContext,
    ) -> (String, RefreshToken) {
        let (secret, hash) = generate_refresh_secret();
        let now = OffsetDateTime::now_utc();
        let row = RefreshToken {
            id: Uuid::new_v4(),
            user_id,
            tenant_id,
            token_hash: hash,
            family_id,
            expires_at: now + self.refresh_ttl,
            revoked_at: None,
            created_at: now,
            user_agent: ctx.user_agent,
            ip: ctx.ip,
        };
        (secret, row)
    }

    fn mint_access(&self, user_id: Uuid, tenant_id: Uuid) -> Result<String> {
        self.jwt
            .issue_access(&user_id.to_string(), &tenant_id.to_string())
            .map_err(|e| AuthError::Internal(e.to_string()))
    }
}

fn generate_refresh_secret() -> (String, String) {
    let raw = format!("{}-{}", Uuid::new_v4(), Uuid::new_v4());
    let hash = hash_refresh_secret(&raw);
    (raw, hash)
}

pub fn hash_refresh_secret(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> TokenService {
        let store = Arc::new(MemoryStore::new());
        let jwt = JwtManager::new("test-secret", Duration::minutes(5));
        TokenService::new(store, jwt, 30)
    }

    #[tokio::test]
    async fn issue_then_rotate_stays_in_family() {
        let svc = service();
        let user = Uuid::new_v4();
        let tenant = Uuid::new_v4();

        let first = svc
            .issue(user, tenant, SessionContext::default())
            .await
            .unwrap();
        let second = svc
            .rotate(&first.refresh_token, SessionContext::default())
            .await
            .unwrap();

        assert_eq!(first.family_id, second.family_id);
        assert_ne!(first.refresh_token, second.refresh_token);
    }

    #[tokio::test]
    async fn plaintext_secret_is_never_stored() {
        let store = Arc::new(MemoryStore::new());
        let jwt = JwtManager::new("test-secret", Duration::minutes(5));
        let svc = TokenService::new(store.clone(), jwt, 30);

        let issued = svc
            .issue(Uuid::new_v4(), Uuid::new_v4(), SessionContext::default())
            .await
            .unwrap();

        assert!(store
            .find_refresh_token(&issued.refresh_token)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_refresh_token(&hash_refresh_secret(&issued.refresh_token))
            .await
            .unwrap()
            .is_some());
    }
}
