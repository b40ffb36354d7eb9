//! Integration tests for trusted device storage.

use chrono::{Duration, Utc};
use keyhold_core::error::KeyholdError;
use keyhold_core::models::device::RegisterDevice;
use keyhold_core::repository::DeviceRepository;
use keyhold_db::MemoryStore;
use uuid::Uuid;

fn device(user_id: Uuid, fingerprint: &str, name: Option<&str>) -> RegisterDevice {
    RegisterDevice {
        user_id,
        device_fingerprint: fingerprint.into(),
        device_name: name.map(Into::into),
        user_agent: Some("test-agent".into()),
        ip_address: None,
    }
}

#[tokio::test]
async fn upsert_is_idempotent_per_fingerprint() {
    let store = MemoryStore::new();
    let user_id = Uuid::new_v4();
    let t0 = Utc::now();

    let (first, created) = store
        .upsert_device(device(user_id, "fp-1", Some("Laptop")), t0)
        .await
        .unwrap();
    assert!(created);

    let t1 = t0 + Duration::seconds(30);
    let (second, created) = store
        .upsert_device(device(user_id, "fp-1", None), t1)
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(second.id, first.id);
    assert_eq!(second.device_name.as_deref(), Some("Laptop"));
    assert_eq!(second.last_used_at, t1);

    assert_eq!(store.list_devices(user_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn same_fingerprint_for_different_users_is_distinct() {
    let store = MemoryStore::new();
    let now = Utc::now();
    let (a, _) = store
        .upsert_device(device(Uuid::new_v4(), "shared", None), now)
        .await
        .unwrap();
    let (b, created) = store
        .upsert_device(device(Uuid::new_v4(), "shared", None), now)
        .await
        .unwrap();
    assert!(created);
    assert_ne!(a.id, b.id);
}

#[tokio::test]
async fn revoke_then_reregister_reactivates() {
    let store = MemoryStore::new();
    let user_id = Uuid::new_v4();
    let (d, _) = store
        .upsert_device(device(user_id, "fp-1", None), Utc::now())
        .await
        .unwrap();

    let revoked = store.deactivate_device(user_id, d.id).await.unwrap();
    assert!(!revoked.is_active);
    let found = store.find_device(user_id, "fp-1").await.unwrap().unwrap();
    assert!(!found.is_active);

    let (again, created) = store
        .upsert_device(device(user_id, "fp-1", None), Utc::now())
        .await
        .unwrap();
    assert!(!created);
    assert!(again.is_active);
    assert_eq!(again.id, d.id);
}

#[tokio::test]
async fn deactivate_checks_ownership() {
    let store = MemoryStore::new();
    let owner = Uuid::new_v4();
    let (d, _) = store
        .upsert_device(device(owner, "fp-1", None), Utc::now())
        .await
        .unwrap();

    let err = store.deactivate_device(Uuid::new_v4(), d.id).await.unwrap_err();
    assert!(matches!(err, KeyholdError::NotFound { .. }));
    assert!(store.find_device(owner, "fp-1").await.unwrap().unwrap().is_active);
}

#[tokio::test]
async fn list_orders_by_last_use_and_revoke_all() {
    let store = MemoryStore::new();
    let user_id = Uuid::new_v4();
    let t0 = Utc::now();
    store
        .upsert_device(device(user_id, "old", None), t0)
        .await
        .unwrap();
    store
        .upsert_device(device(user_id, "new", None), t0 + Duration::minutes(5))
        .await
        .unwrap();

    let listed = store.list_devices(user_id).await.unwrap();
    assert_eq!(listed[0].device_fingerprint, "new");
    assert_eq!(listed[1].device_fingerprint, "old");

    let revoked = store.deactivate_all_devices(user_id).await.unwrap();
    assert_eq!(revoked.len(), 2);
    assert!(store.deactivate_all_devices(user_id).await.unwrap().is_empty());
}
