//! Login authentication backends.
//!
//! Primary login is a configuration-selected capability: either the local
//! credential table (argon2 verification) or a hosted identity provider
//! reached over HTTP. Selected once at startup via `AUTH_PROVIDER`.

use reqwest::Client;
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::domain::User;
use crate::error::{AuthError, Result};
use crate::infra::db::Db;
use crate::security::password;

#[derive(Clone)]
pub enum IdentityProvider {
    /// Verify against the local `users` table.
    Local,
    /// Delegate the password check to a hosted identity provider; the
    /// local row still supplies tenant membership.
    External(ExternalIdp),
}

#[derive(Clone)]
pub struct ExternalIdp {
    url: String,
    api_key: String,
    http: Client,
}

impl IdentityProvider {
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var("AUTH_PROVIDER").as_deref() {
            Ok("external") => Ok(IdentityProvider::External(ExternalIdp::from_env()?)),
            _ => Ok(IdentityProvider::Local),
        }
    }

    pub async fn authenticate(&self, db: &Db, email: &str, password_plain: &str) -> Result<User> {
        match self {
            IdentityProvider::Local => {
                let Some(user) = find_user(db, email).await? else {
                    return Err(AuthError::Authentication);
                };
                let valid = password::verify_password(password_plain, &user.password_hash)
                    .map_err(|e| AuthError::Internal(e.to_string()))?;
                if !valid {
                    return Err(AuthError::Authentication);
                }
                Ok(user)
            }
            IdentityProvider::External(idp) => {
                idp.verify_password(email, password_plain).await?;
                // The provider vouched for the credentials; tenant
                // membership still comes from our own row.
                let Some(user) = find_user(db, email).await? else {
                    tracing::warn!(email, "identity provider accepted unknown user");
                    return Err(AuthError::Authentication);
                };
                Ok(user)
            }
        }
    }
}

async fn find_user(db: &Db, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, tenant_id, email, password_hash, name, created_at, updated_at
         FROM users WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(db)
    .await?;
    Ok(row.as_ref().map(user_from_row))
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        name: row.get("name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl ExternalIdp {
    pub fn from_env() -> anyhow::Result<Self> {
        let url = first_env(&["IDP_URL", "AUTH_IDP_URL"])
            .ok_or_else(|| anyhow::anyhow!("IDP_URL missing (required with AUTH_PROVIDER=external)"))?;
        let api_key = first_env(&["IDP_API_KEY", "AUTH_IDP_API_KEY"])
            .ok_or_else(|| anyhow::anyhow!("IDP_API_KEY missing (required with AUTH_PROVIDER=external)"))?;
        let http = Client::builder().user_agent("vizor-api").build()?;
        Ok(Self { url, api_key, http })
    }

    async fn verify_password(&self, email: &str, password_plain: &str) -> Result<()> {
        let endpoint = format!("{}/token?grant_type=password", self.url.trim_end_matches('/'));
        let res = self
            .http
            .post(&endpoint)
            .header("apikey", &self.api_key)
            .json(&json!({ "email": email, "password": password_plain }))
            .send()
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        if res.status().is_success() {
            Ok(())
        } else if res.status().is_client_error() {
            Err(AuthError::Authentication)
        } else {
            Err(AuthError::Internal(format!(
                "identity provider returned {}",
                res.status()
            )))
        }
    }
}

fn first_env(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(val) = std::env::var(key) {
            if !val.trim().is_empty() {
                return Some(val);
            }
        }
    }
    None
}
