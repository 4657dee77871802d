//! Session cache behaviour against the sqlite store

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use wardgate_control::{SessionError, SessionStore};
use wardgate_db::{NewDevice, Store};
use wardgate_proto::{Device, Session};

async fn device(store: &dyn Store, serial: &str) -> Device {
    store
        .enroll_device(NewDevice {
            serial: serial.to_string(),
            platform: "linux".to_string(),
            public_key: format!("key-{}", serial),
            username: "user@example.com".to_string(),
            healthy: true,
        })
        .await
        .unwrap()
}

fn session(key: &str, device: Device, expiry: chrono::DateTime<Utc>) -> Session {
    Session {
        key: key.to_string(),
        device,
        object_id: "user-1".to_string(),
        groups: vec!["g1".to_string()],
        expiry,
    }
}

#[tokio::test]
async fn test_set_replaces_session_for_same_device() {
    let plane = common::setup().await;
    let sessions = SessionStore::new(plane.store.clone());
    let dev = device(plane.store.as_ref(), "a").await;
    let expiry = Utc::now() + Duration::hours(1);

    sessions.set(session("first", dev.clone(), expiry)).await.unwrap();
    sessions.set(session("second", dev.clone(), expiry)).await.unwrap();

    assert!(matches!(sessions.get("first").await, Err(SessionError::NoSession)));
    assert_eq!(sessions.get("second").await.unwrap().device.id, dev.id);

    let all = sessions.all().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].key, "second");
}

#[tokio::test]
async fn test_expired_is_distinct_from_missing() {
    let plane = common::setup().await;
    let sessions = SessionStore::new(plane.store.clone());
    let dev = device(plane.store.as_ref(), "a").await;

    sessions
        .set(session("old", dev, Utc::now() - Duration::minutes(5)))
        .await
        .unwrap();

    assert!(matches!(sessions.get("old").await, Err(SessionError::Expired)));
    assert!(matches!(sessions.get("unknown").await, Err(SessionError::NoSession)));
}

#[tokio::test]
async fn test_cache_miss_falls_back_to_store() {
    let plane = common::setup().await;
    let dev = device(plane.store.as_ref(), "a").await;
    plane
        .store
        .add_session(&session("persisted", dev.clone(), Utc::now() + Duration::hours(1)))
        .await
        .unwrap();

    let sessions = SessionStore::new(plane.store.clone());
    let found = sessions.get("persisted").await.unwrap();
    assert_eq!(found.device.id, dev.id);
    assert_eq!(sessions.all().await.len(), 1);
}

#[tokio::test]
async fn test_all_evicts_expired_sessions() {
    let plane = common::setup().await;
    let sessions = SessionStore::new(plane.store.clone());
    let a = device(plane.store.as_ref(), "a").await;
    let b = device(plane.store.as_ref(), "b").await;

    sessions
        .set(session("live", a, Utc::now() + Duration::hours(1)))
        .await
        .unwrap();
    sessions
        .set(session("stale", b, Utc::now() - Duration::seconds(1)))
        .await
        .unwrap();

    let keys: Vec<String> = sessions.all().await.into_iter().map(|s| s.key).collect();
    assert_eq!(keys, vec!["live".to_string()]);
}

#[tokio::test]
async fn test_refresh_device_updates_cached_snapshot() {
    let plane = common::setup().await;
    let sessions = SessionStore::new(plane.store.clone());
    let dev = device(plane.store.as_ref(), "a").await;
    sessions
        .set(session("key", dev.clone(), Utc::now() + Duration::hours(1)))
        .await
        .unwrap();

    let mut updated = dev.clone();
    updated.healthy = false;
    updated.last_updated = Some(Utc::now());
    sessions.refresh_device(&updated).await;

    let cached = sessions.get("key").await.unwrap();
    assert!(!cached.device.healthy);
    assert!(cached.device.last_updated.is_some());
}

#[tokio::test]
async fn test_warmup_loads_live_sessions_and_purges_expired() {
    let plane = common::setup().await;
    let store: Arc<dyn Store> = plane.store.clone();
    let a = device(store.as_ref(), "a").await;
    let b = device(store.as_ref(), "b").await;

    store
        .add_session(&session("live", a, Utc::now() + Duration::hours(1)))
        .await
        .unwrap();
    store
        .add_session(&session("expired", b, Utc::now() - Duration::hours(1)))
        .await
        .unwrap();

    let sessions = SessionStore::new(store.clone());
    assert_eq!(sessions.warmup().await.unwrap(), 1);
    assert!(sessions.get("live").await.is_ok());
    assert!(store.read_session("expired").await.unwrap_err().is_not_found());
}
