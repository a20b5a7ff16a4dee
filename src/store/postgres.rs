use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::{ApiKey, ApiKeyUpdate, RefreshToken};
use crate::error::{AuthError, Result};
use crate::infra::db::Db;

use super::CredentialStore;

#[derive(Clone)]
pub struct PgStore {
    pool: Db,
}

impl PgStore {
    pub fn new(pool: Db) -> Self {
        Self { pool }
    }
}

fn map_unique_violation(err: sqlx::Error) -> AuthError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.constraint().is_some() {
            return AuthError::Conflict;
        }
    }
    AuthError::Storage(err)
}

fn refresh_token_from_row(row: &PgRow) -> RefreshToken {
    RefreshToken {
        id: row.get("id"),
        user_id: row.get("user_id"),
        tenant_id: row.get("tenant_id"),
        token_hash: row.get("token_hash"),
        family_id: row.get("family_id"),
        expires_at: row.get("expires_at"),
        revoked_at: row.get("revoked_at"),
        created_at: row.get("created_at"),
        user_agent: row.get("user_agent"),
        ip: row.get("ip"),
    }
}

fn api_key_from_row(row: &PgRow) -> ApiKey {
    ApiKey {
        id: row.get("id"),
        user_id: row.get("user_id"),
        tenant_id: row.get("tenant_id"),
        key_name: row.get("key_name"),
        key_prefix: row.get("key_prefix"),
        key_hash: row.get("key_hash"),
        scopes: row.get("scopes"),
        is_active: row.get("is_active"),
        rate_limit_per_minute: row.get("rate_limit_per_minute"),
        expires_at: row.get("expires_at"),
        last_used_at: row.get("last_used_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const API_KEY_COLUMNS: &str = "id, user_id, tenant_id, key_name, key_prefix, key_hash, scopes, \
     is_active, rate_limit_per_minute, expires_at, last_used_at, created_at, updated_at";

#[async_trait]
impl CredentialStore for PgStore {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, tenant_id, token_hash, family_id, expires_at, revoked_at, created_at, user_agent, ip)
             VALUES ($1, $2, $3, $4, $5, $6, NULL, $7, $8, $9)",
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(token.tenant_id)
        .bind(&token.token_hash)
        .bind(token.family_id)
        .bind(token.expires_at)
        .bind(token.created_at)
        .bind(&token.user_agent)
        .bind(&token.ip)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        let row = sqlx::query(
            "SELECT id, user_id, tenant_id, token_hash, family_id, expires_at, revoked_at, created_at, user_agent, ip
             FROM refresh_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(refresh_token_from_row))
    }

    async fn rotate_refresh_token(
        &self,
        consumed_id: Uuid,
        successor: &RefreshToken,
    ) -> Result<bool> {
        // Consume and issue inside one transaction so the transition is a
        // single atomic store operation. The conditional UPDATE is the
        // concurrency gate: exactly one of two racing callers sees a row
        // affected.
        let mut tx = self.pool.begin().await?;

        let consumed = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(consumed_id)
        .execute(&mut *tx)
        .await?;

        if consumed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, tenant_id, token_hash, family_id, expires_at, revoked_at, created_at, user_agent, ip)
             VALUES ($1, $2, $3, $4, $5, $6, NULL, $7, $8, $9)",
        )
        .bind(successor.id)
        .bind(successor.user_id)
        .bind(successor.tenant_id)
        .bind(&successor.token_hash)
        .bind(successor.family_id)
        .bind(successor.expires_at)
        .bind(successor.created_at)
        .bind(&successor.user_agent)
        .bind(&successor.ip)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn revoke_family(&self, family_id: Uuid) -> Result<u64> {
        let res = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = now() WHERE family_id = $1 AND revoked_at IS NULL",
        )
        .bind(family_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<u64> {
        let res = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = now() WHERE token_hash = $1 AND revoked_at IS NULL",
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64> {
        let res = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = now() WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn delete_expired_tokens(&self) -> Result<u64> {
        let res = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < now()")
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn insert_api_key(&self, key: &ApiKey) -> Result<()> {
        sqlx::query(
            "INSERT INTO api_keys (id, user_id, tenant_id, key_name, key_prefix, key_hash, scopes, is_active, rate_limit_per_minute, expires_at, last_used_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NULL, $11, $12)",
        )
        .bind(key.id)
        .bind(key.user_id)
        .bind(key.tenant_id)
        .bind(&key.key_name)
        .bind(&key.key_prefix)
        .bind(&key.key_hash)
        .bind(&key.scopes)
        .bind(key.is_active)
        .bind(key.rate_limit_per_minute)
        .bind(key.expires_at)
        .bind(key.created_at)
        .bind(key.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;
        Ok(())
    }

    async fn find_api_keys_by_prefix(&self, key_prefix: &str) -> Result<Vec<ApiKey>> {
        let rows = sqlx::query(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_prefix = $1"
        ))
        .bind(key_prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(api_key_from_row).collect())
    }

    async fn list_api_keys(&self, user_id: Uuid) -> Result<Vec<ApiKey>> {
        let rows = sqlx::query(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(api_key_from_row).collect())
    }

    async fn update_api_key(
        &self,
        id: Uuid,
        user_id: Uuid,
        update: &ApiKeyUpdate,
    ) -> Result<Option<ApiKey>> {
        let row = sqlx::query(&format!(
            "UPDATE api_keys SET
                 key_name = COALESCE($3, key_name),
                 is_active = COALESCE($4, is_active),
                 expires_at = COALESCE($5, expires_at),
                 rate_limit_per_minute = COALESCE($6, rate_limit_per_minute),
                 scopes = COALESCE($7, scopes),
                 updated_at = now()
             WHERE id = $1 AND user_id = $2
             RETURNING {API_KEY_COLUMNS}"
        ))
        .bind(id)
        .bind(user_id)
        .bind(&update.key_name)
        .bind(update.is_active)
        .bind(update.expires_at)
        .bind(update.rate_limit_per_minute)
        .bind(&update.scopes)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_unique_violation)?;
        Ok(row.as_ref().map(api_key_from_row))
    }

    async fn delete_api_key(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let res = sqlx::query("DELETE FROM api_keys WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn touch_api_key_last_used(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
