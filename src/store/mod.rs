//! Credential store seam.
//!
//! The rotation engine relies on the store's atomic conditional-update
//! primitive as its only concurrency gate; there is no in-process locking
//! around rotation. [`PgStore`] is the production backend, [`MemoryStore`]
//! backs tests and local development.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{ApiKey, ApiKeyUpdate, RefreshToken};
use crate::error::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<()>;

    /// Looks up by hash regardless of revocation state. Revoked rows must
    /// stay queryable so reuse of a consumed token can be detected.
    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshToken>>;

    /// Atomically consumes `consumed_id` (marks it revoked only if it is
    /// still unrevoked) and inserts `successor` in the same operation.
    /// Returns `false` without inserting when another caller already
    /// consumed the row.
    async fn rotate_refresh_token(&self, consumed_id: Uuid, successor: &RefreshToken)
        -> Result<bool>;

    /// Revokes every still-active row in the family. Returns the number of
    /// rows revoked.
    async fn revoke_family(&self, family_id: Uuid) -> Result<u64>;

    /// Best-effort revocation of a single row; no-op when already gone.
    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<u64>;

    /// Revokes every row for the user across all families.
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64>;

    /// Removes rows whose `expires_at` has passed, across all families and
    /// revocation states. Returns the number of rows deleted.
    async fn delete_expired_tokens(&self) -> Result<u64>;

    async fn insert_api_key(&self, key: &ApiKey) -> Result<()>;

    async fn find_api_keys_by_prefix(&self, key_prefix: &str) -> Result<Vec<ApiKey>>;

    async fn list_api_keys(&self, user_id: Uuid) -> Result<Vec<ApiKey>>;

    async fn update_api_key(
        &self,
        id: Uuid,
        user_id: Uuid,
        update: &ApiKeyUpdate,
    ) -> Result<Option<ApiKey>>;

    async fn delete_api_key(&self, id: Uuid, user_id: Uuid) -> Result<bool>;

    async fn touch_api_key_last_used(&self, id: Uuid) -> Result<()>;
}
