//! End-to-end rotation semantics against the in-memory store: single-use
//! tokens, family-wide compromise on reuse, and race behavior between
//! concurrent rotations of the same secret.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use vizor_api::domain::RefreshToken;
use vizor_api::error::AuthError;
use vizor_api::security::jwt::JwtManager;
use vizor_api::security::tokens::{hash_refresh_secret, SessionContext, TokenService};
use vizor_api::store::{CredentialStore, MemoryStore};

fn setup() -> (TokenService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let jwt = JwtManager::new("test-secret", Duration::minutes(5));
    let service = TokenService::new(store.clone(), jwt, 30);
    (service, store)
}

fn ctx() -> SessionContext {
    SessionContext::default()
}

#[tokio::test]
async fn refresh_token_is_single_use() {
    let (service, _) = setup();
    let issued = service.issue(Uuid::new_v4(), Uuid::new_v4(), ctx()).await.unwrap();

    assert!(service.rotate(&issued.refresh_token, ctx()).await.is_ok());
    // The same secret a second time is reuse: terminal for the family.
    assert!(matches!(
        service.rotate(&issued.refresh_token, ctx()).await,
        Err(AuthError::Security)
    ));
}

#[tokio::test]
async fn login_rotate_reuse_scenario() {
    let (service, _) = setup();
    let user = Uuid::new_v4();
    let tenant = Uuid::new_v4();

    // Login: {access1, refresh1} in family F.
    let first = service.issue(user, tenant, ctx()).await.unwrap();

    // Rotate with refresh1: {access2, refresh2}, still family F.
    let second = service.rotate(&first.refresh_token, ctx()).await.unwrap();
    assert_eq!(second.family_id, first.family_id);

    // Replaying refresh1 compromises family F.
    assert!(matches!(
        service.rotate(&first.refresh_token, ctx()).await,
        Err(AuthError::Security)
    ));

    // refresh2 was never itself reused, but its family is gone.
    assert!(matches!(
        service.rotate(&second.refresh_token, ctx()).await,
        Err(AuthError::Security)
    ));
}

#[tokio::test]
async fn concurrent_rotation_has_exactly_one_winner() {
    let (service, _) = setup();
    let issued = service.issue(Uuid::new_v4(), Uuid::new_v4(), ctx()).await.unwrap();

    let s1 = service.clone();
    let s2 = service.clone();
    let t1 = issued.refresh_token.clone();
    let t2 = issued.refresh_token.clone();
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { s1.rotate(&t1, SessionContext::default()).await }),
        tokio::spawn(async move { s2.rotate(&t2, SessionContext::default()).await }),
    );
    let results = [r1.unwrap(), r2.unwrap()];

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one concurrent rotation may succeed");
    for r in &results {
        if let Err(err) = r {
            assert!(matches!(err, AuthError::Security), "loser must surface compromise");
        }
    }

    // The loser revoked the family, successor included.
    let successor = results.into_iter().find_map(|r| r.ok()).unwrap();
    assert!(matches!(
        service.rotate(&successor.refresh_token, ctx()).await,
        Err(AuthError::Security)
    ));
}

#[tokio::test]
async fn expired_token_fails_like_unknown() {
    let (service, store) = setup();
    let now = OffsetDateTime::now_utc();
    let secret = "expired-secret";
    let row = RefreshToken {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        token_hash: hash_refresh_secret(secret),
        family_id: Uuid::new_v4(),
        expires_at: now - Duration::minutes(1),
        revoked_at: None,
        created_at: now - Duration::days(31),
        user_agent: None,
        ip: None,
    };
    store.insert_refresh_token(&row).await.unwrap();

    assert!(matches!(
        service.rotate(secret, ctx()).await,
        Err(AuthError::Authentication)
    ));
    assert!(matches!(
        service.rotate("never-existed", ctx()).await,
        Err(AuthError::Authentication)
    ));
}

#[tokio::test]
async fn cleaned_up_token_behaves_as_never_existed() {
    let (service, store) = setup();
    let now = OffsetDateTime::now_utc();
    let secret = "swept-secret";
    let row = RefreshToken {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        token_hash: hash_refresh_secret(secret),
        family_id: Uuid::new_v4(),
        expires_at: now - Duration::hours(2),
        revoked_at: None,
        created_at: now - Duration::days(31),
        user_agent: None,
        ip: None,
    };
    store.insert_refresh_token(&row).await.unwrap();

    assert_eq!(store.delete_expired_tokens().await.unwrap(), 1);
    assert!(matches!(
        service.rotate(secret, ctx()).await,
        Err(AuthError::Authentication)
    ));
}

#[tokio::test]
async fn logout_revokes_single_token_best_effort() {
    let (service, _) = setup();
    let issued = service.issue(Uuid::new_v4(), Uuid::new_v4(), ctx()).await.unwrap();

    service.logout(&issued.refresh_token).await.unwrap();
    assert!(service.rotate(&issued.refresh_token, ctx()).await.is_err());

    // Unknown token is not an error.
    service.logout("already-gone").await.unwrap();
}

#[tokio::test]
async fn logout_all_invalidates_every_family() {
    let (service, _) = setup();
    let user = Uuid::new_v4();
    let tenant = Uuid::new_v4();

    let desktop = service.issue(user, tenant, ctx()).await.unwrap();
    let mobile = service.issue(user, tenant, ctx()).await.unwrap();
    assert_ne!(desktop.family_id, mobile.family_id);

    let revoked = service.logout_all(user).await.unwrap();
    assert_eq!(revoked, 2);

    assert!(service.rotate(&desktop.refresh_token, ctx()).await.is_err());
    assert!(service.rotate(&mobile.refresh_token, ctx()).await.is_err());
}
