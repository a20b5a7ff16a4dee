use std::sync::Arc;

use crate::infra::db::Db;
use crate::security::api_keys::ApiKeyService;
use crate::security::config::SecurityConfig;
use crate::security::jwt::JwtManager;
use crate::security::provider::IdentityProvider;
use crate::security::rate_limit::RateLimiter;
use crate::security::tokens::TokenService;
use crate::store::CredentialStore;

pub struct AppState {
    pub db: Db,
    pub jwt: JwtManager,
    pub security: SecurityConfig,
    pub provider: IdentityProvider,
    pub tokens: TokenService,
    pub api_keys: ApiKeyService,
    pub limiter: RateLimiter,
}

impl AppState {
    pub fn new(
        db: Db,
        store: Arc<dyn CredentialStore>,
        jwt: JwtManager,
        security: SecurityConfig,
        provider: IdentityProvider,
    ) -> Arc<Self> {
        let tokens = TokenService::new(store.clone(), jwt.clone(), security.refresh_ttl_days);
        let api_keys = ApiKeyService::new(store, security.default_key_rate_limit);
        Arc::new(Self {
            db,
            jwt,
            security,
            provider,
            tokens,
            api_keys,
            limiter: RateLimiter::new(),
        })
    }
}
