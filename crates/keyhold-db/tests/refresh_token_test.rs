//! Integration tests for refresh token rotation.

use std::sync::Arc;

use chrono::{Duration, Utc};
use keyhold_core::models::refresh_token::{CreateRefreshToken, RotationOutcome};
use keyhold_core::repository::RefreshTokenRepository;
use keyhold_db::MemoryStore;
use uuid::Uuid;

fn token(user_id: Uuid, family_id: Uuid, ttl: Duration) -> CreateRefreshToken {
    let now = Utc::now();
    CreateRefreshToken {
        token_id: Uuid::new_v4(),
        user_id,
        family_id,
        issued_at: now,
        expires_at: now + ttl,
    }
}

#[tokio::test]
async fn rotate_marks_predecessor_and_stores_successor() {
    let store = MemoryStore::new();
    let (user_id, family_id) = (Uuid::new_v4(), Uuid::new_v4());
    let first = store
        .create_refresh_token(token(user_id, family_id, Duration::days(1)))
        .await
        .unwrap();

    let successor = token(user_id, family_id, Duration::days(1));
    let successor_id = successor.token_id;
    let outcome = store
        .rotate_refresh_token(first.token_id, successor, Utc::now())
        .await
        .unwrap();
    assert!(matches!(outcome, RotationOutcome::Rotated(ref r) if r.token_id == successor_id));

    let old = store.get_refresh_token(first.token_id).await.unwrap().unwrap();
    assert!(old.revoked_at.is_some());
    assert_eq!(old.replaced_by_token_id, Some(successor_id));
}

#[tokio::test]
async fn rotating_revoked_token_reports_replay() {
    let store = MemoryStore::new();
    let (user_id, family_id) = (Uuid::new_v4(), Uuid::new_v4());
    let first = store
        .create_refresh_token(token(user_id, family_id, Duration::days(1)))
        .await
        .unwrap();
    store
        .rotate_refresh_token(
            first.token_id,
            token(user_id, family_id, Duration::days(1)),
            Utc::now(),
        )
        .await
        .unwrap();

    let outcome = store
        .rotate_refresh_token(
            first.token_id,
            token(user_id, family_id, Duration::days(1)),
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        RotationOutcome::Replayed { user_id: u, family_id: f } if u == user_id && f == family_id
    ));
}

#[tokio::test]
async fn revoked_but_never_rotated_token_is_not_a_replay() {
    let store = MemoryStore::new();
    let (user_id, family_id) = (Uuid::new_v4(), Uuid::new_v4());
    let first = store
        .create_refresh_token(token(user_id, family_id, Duration::days(1)))
        .await
        .unwrap();
    store.revoke_token_family(family_id, Utc::now()).await.unwrap();

    let outcome = store
        .rotate_refresh_token(
            first.token_id,
            token(user_id, family_id, Duration::days(1)),
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, RotationOutcome::Revoked));
}

#[tokio::test]
async fn rotated_then_revoked_token_still_reports_replay() {
    let store = MemoryStore::new();
    let (user_id, family_id) = (Uuid::new_v4(), Uuid::new_v4());
    let first = store
        .create_refresh_token(token(user_id, family_id, Duration::days(1)))
        .await
        .unwrap();
    store
        .rotate_refresh_token(
            first.token_id,
            token(user_id, family_id, Duration::days(1)),
            Utc::now(),
        )
        .await
        .unwrap();
    store.revoke_user_tokens(user_id, Utc::now()).await.unwrap();

    let outcome = store
        .rotate_refresh_token(
            first.token_id,
            token(user_id, family_id, Duration::days(1)),
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, RotationOutcome::Replayed { .. }));
}

#[tokio::test]
async fn expired_and_unknown_tokens() {
    let store = MemoryStore::new();
    let (user_id, family_id) = (Uuid::new_v4(), Uuid::new_v4());
    let stale = store
        .create_refresh_token(token(user_id, family_id, Duration::seconds(-1)))
        .await
        .unwrap();

    let outcome = store
        .rotate_refresh_token(
            stale.token_id,
            token(user_id, family_id, Duration::days(1)),
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, RotationOutcome::Expired));

    let outcome = store
        .rotate_refresh_token(
            Uuid::new_v4(),
            token(user_id, family_id, Duration::days(1)),
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, RotationOutcome::NotFound));

    assert_eq!(store.purge_expired_refresh_tokens(Utc::now()).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rotation_has_single_winner() {
    let store = Arc::new(MemoryStore::new());
    let (user_id, family_id) = (Uuid::new_v4(), Uuid::new_v4());
    let first = store
        .create_refresh_token(token(user_id, family_id, Duration::days(1)))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let token_id = first.token_id;
        handles.push(tokio::spawn(async move {
            store
                .rotate_refresh_token(
                    token_id,
                    token(user_id, family_id, Duration::days(1)),
                    Utc::now(),
                )
                .await
                .unwrap()
        }));
    }

    let mut rotated = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), RotationOutcome::Rotated(_)) {
            rotated += 1;
        }
    }
    assert_eq!(rotated, 1);
}

#[tokio::test]
async fn revoke_by_family_and_by_user() {
    let store = MemoryStore::new();
    let user_id = Uuid::new_v4();
    let (family_a, family_b) = (Uuid::new_v4(), Uuid::new_v4());
    store
        .create_refresh_token(token(user_id, family_a, Duration::days(1)))
        .await
        .unwrap();
    store
        .create_refresh_token(token(user_id, family_b, Duration::days(1)))
        .await
        .unwrap();
    store
        .create_refresh_token(token(user_id, family_b, Duration::days(1)))
        .await
        .unwrap();

    assert_eq!(store.revoke_token_family(family_a, Utc::now()).await.unwrap(), 1);
    assert_eq!(store.revoke_user_tokens(user_id, Utc::now()).await.unwrap(), 2);
    assert_eq!(store.revoke_user_tokens(user_id, Utc::now()).await.unwrap(), 0);
}
