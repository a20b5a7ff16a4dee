//! API key lifecycle against the in-memory store: generation, masked
//! persistence, validation edge cases and scope authorization.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use vizor_api::domain::{ApiKey, ApiKeyUpdate};
use vizor_api::error::AuthError;
use vizor_api::security::api_keys::{hash_api_key, ApiKeyService, GenerateOptions};
use vizor_api::store::{CredentialStore, MemoryStore};

fn setup() -> (ApiKeyService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let service = ApiKeyService::new(store.clone(), 60);
    (service, store)
}

fn raw_key(id_part: &str, secret_part: &str) -> String {
    // Tag + 8-char prefix portion + remainder, mirroring generated shape.
    format!("vz_{id_part}{secret_part}")
}

fn stored_key(user_id: Uuid, name: &str, plaintext: &str, scopes: Vec<&str>) -> ApiKey {
    let now = OffsetDateTime::now_utc();
    ApiKey {
        id: Uuid::new_v4(),
        user_id,
        tenant_id: Uuid::new_v4(),
        key_name: name.into(),
        key_prefix: plaintext[..11].to_string(),
        key_hash: hash_api_key(plaintext),
        scopes: scopes.into_iter().map(String::from).collect(),
        is_active: true,
        rate_limit_per_minute: 60,
        expires_at: None,
        last_used_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn generated_key_validates_and_defaults_to_write_scope() {
    let (service, store) = setup();
    let user = Uuid::new_v4();
    let tenant = Uuid::new_v4();

    let generated = service
        .generate(user, tenant, "ci-ingest", GenerateOptions::default())
        .await
        .unwrap();

    assert!(generated.plaintext.starts_with("vz_"));
    assert_eq!(generated.record.scopes, vec!["metrics:write".to_string()]);

    let validated = service.validate(&generated.plaintext).await.unwrap();
    assert_eq!(validated.id, generated.record.id);
    assert_eq!(validated.tenant_id, tenant);

    // Only the prefix and the digest are persisted.
    let stored = store.find_api_keys_by_prefix(&generated.record.key_prefix).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_ne!(stored[0].key_hash, generated.plaintext);
    assert_eq!(stored[0].key_hash, hash_api_key(&generated.plaintext));
}

#[tokio::test]
async fn colliding_prefixes_never_cross_validate() {
    let (service, store) = setup();
    let user = Uuid::new_v4();

    // Same 8-char prefix portion, different secrets.
    let plain_a = raw_key("aaaaaaaa", &"1".repeat(56));
    let plain_b = raw_key("aaaaaaaa", &"2".repeat(56));
    let key_a = stored_key(user, "a", &plain_a, vec!["metrics:write"]);
    let key_b = stored_key(user, "b", &plain_b, vec!["metrics:write"]);
    assert_eq!(key_a.key_prefix, key_b.key_prefix);
    store.insert_api_key(&key_a).await.unwrap();
    store.insert_api_key(&key_b).await.unwrap();

    assert_eq!(service.validate(&plain_a).await.unwrap().id, key_a.id);
    assert_eq!(service.validate(&plain_b).await.unwrap().id, key_b.id);

    // Same prefix, unknown secret: rejected.
    let impostor = raw_key("aaaaaaaa", &"3".repeat(56));
    assert!(matches!(
        service.validate(&impostor).await,
        Err(AuthError::Authentication)
    ));
}

#[tokio::test]
async fn untagged_or_unknown_keys_rejected() {
    let (service, _) = setup();
    assert!(matches!(
        service.validate("sk_not_ours_at_all").await,
        Err(AuthError::Authentication)
    ));
    assert!(matches!(
        service.validate(&raw_key("deadbeef", &"f".repeat(56))).await,
        Err(AuthError::Authentication)
    ));
    // Too short to even carry a prefix.
    assert!(matches!(
        service.validate("vz_ab").await,
        Err(AuthError::Authentication)
    ));
}

#[tokio::test]
async fn inactive_key_rejected() {
    let (service, store) = setup();
    let plain = raw_key("bbbbbbbb", &"4".repeat(56));
    let mut key = stored_key(Uuid::new_v4(), "paused", &plain, vec!["metrics:write"]);
    key.is_active = false;
    store.insert_api_key(&key).await.unwrap();

    assert!(matches!(
        service.validate(&plain).await,
        Err(AuthError::Authentication)
    ));
}

#[tokio::test]
async fn expired_key_rejected_even_when_active() {
    let (service, store) = setup();
    let plain = raw_key("cccccccc", &"5".repeat(56));
    let mut key = stored_key(Uuid::new_v4(), "stale", &plain, vec!["metrics:write"]);
    key.expires_at = Some(OffsetDateTime::now_utc() - Duration::minutes(1));
    assert!(key.is_active);
    store.insert_api_key(&key).await.unwrap();

    assert!(matches!(
        service.validate(&plain).await,
        Err(AuthError::Authentication)
    ));
}

#[tokio::test]
async fn scope_check_separates_forbidden_from_unauthenticated() {
    let (service, _) = setup();
    let generated = service
        .generate(Uuid::new_v4(), Uuid::new_v4(), "writer", GenerateOptions::default())
        .await
        .unwrap();
    let key = generated.record;

    assert!(service.require_scope(&key, "metrics:write").is_ok());
    let err = service.require_scope(&key, "metrics:read").unwrap_err();
    assert!(matches!(err, AuthError::Authorization { .. }));
}

#[tokio::test]
async fn duplicate_name_for_same_user_conflicts() {
    let (service, _) = setup();
    let user = Uuid::new_v4();
    let tenant = Uuid::new_v4();
    service
        .generate(user, tenant, "primary", GenerateOptions::default())
        .await
        .unwrap();
    assert!(matches!(
        service.generate(user, tenant, "primary", GenerateOptions::default()).await,
        Err(AuthError::Conflict)
    ));
    // A different user may reuse the name.
    assert!(service
        .generate(Uuid::new_v4(), tenant, "primary", GenerateOptions::default())
        .await
        .is_ok());
}

#[tokio::test]
async fn validate_touches_last_used_off_critical_path() {
    let (service, store) = setup();
    let generated = service
        .generate(Uuid::new_v4(), Uuid::new_v4(), "sdk", GenerateOptions::default())
        .await
        .unwrap();

    service.validate(&generated.plaintext).await.unwrap();
    // The touch is fire-and-forget; give the spawned task a moment.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let stored = store
        .find_api_keys_by_prefix(&generated.record.key_prefix)
        .await
        .unwrap();
    assert!(stored[0].last_used_at.is_some());
}

#[tokio::test]
async fn owner_updates_deactivate_and_rescope() {
    let (service, _) = setup();
    let user = Uuid::new_v4();
    let generated = service
        .generate(user, Uuid::new_v4(), "ops", GenerateOptions::default())
        .await
        .unwrap();
    let id = generated.record.id;

    let updated = service
        .update(
            id,
            user,
            &ApiKeyUpdate {
                scopes: Some(vec!["metrics:read".into(), "metrics:write".into()]),
                rate_limit_per_minute: Some(120),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert!(updated.has_scope("metrics:read"));
    assert_eq!(updated.rate_limit_per_minute, 120);

    let deactivated = service
        .update(
            id,
            user,
            &ApiKeyUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert!(!deactivated.is_active);
    assert!(service.validate(&generated.plaintext).await.is_err());

    // Another user cannot touch the key.
    assert!(service
        .update(id, Uuid::new_v4(), &ApiKeyUpdate::default())
        .await
        .unwrap()
        .is_none());

    assert!(service.delete(id, user).await.unwrap());
    assert!(!service.delete(id, user).await.unwrap());
}
