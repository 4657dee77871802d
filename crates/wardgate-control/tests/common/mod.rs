//! Shared fixtures for control plane integration tests

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use chrono::Duration;
use ipnet::Ipv4Net;
use wardgate_auth::{hash_password, IdentityClaims, JwtTokenValidator};
use wardgate_control::{ApiServer, ApiServerConfig, GrantRegistry, Metrics};
use wardgate_db::{connect, migrate, DbStore, Store};
use wardgate_proto::{AdminCredentials, Gateway, Session};

pub const SECRET: &[u8] = b"control-plane-test-secret";
pub const ADMIN_PASSWORD: &str = "admin-password";
pub const GATEWAY_PASSWORD: &str = "gateway-password";

static ADMIN_HASH: OnceLock<String> = OnceLock::new();
static GATEWAY_HASH: OnceLock<String> = OnceLock::new();

pub fn admin_hash() -> String {
    ADMIN_HASH
        .get_or_init(|| hash_password(ADMIN_PASSWORD).unwrap())
        .clone()
}

pub fn gateway_hash() -> String {
    GATEWAY_HASH
        .get_or_init(|| hash_password(GATEWAY_PASSWORD).unwrap())
        .clone()
}

pub fn admin() -> AdminCredentials {
    AdminCredentials {
        username: "admin".to_string(),
        password: ADMIN_PASSWORD.to_string(),
    }
}

pub struct TestControlPlane {
    pub api: ApiServer,
    pub store: Arc<DbStore>,
}

pub async fn setup() -> TestControlPlane {
    setup_with(|_| {}).await
}

pub async fn setup_with(tweak: impl FnOnce(&mut ApiServerConfig)) -> TestControlPlane {
    let db = connect("sqlite::memory:").await.expect("connect");
    migrate(&db).await.expect("migrate");

    let mut config = ApiServerConfig {
        admin_password_hash: admin_hash(),
        control_plane_public_key: "control-plane-key".to_string(),
        control_plane_endpoint: "203.0.113.10:51820".to_string(),
        ..Default::default()
    };
    tweak(&mut config);

    let network: Ipv4Net = config.device_network;
    let store = Arc::new(DbStore::new(db, network));
    let api = ApiServer::new(
        config,
        store.clone(),
        Arc::new(JwtTokenValidator::new(SECRET)),
        Arc::new(GrantRegistry::new()),
        Arc::new(Metrics::new().unwrap()),
    );

    TestControlPlane { api, store }
}

pub fn token(object_id: &str, groups: &[&str]) -> String {
    let claims = IdentityClaims::new(object_id, Duration::hours(1))
        .with_username(format!("{}@example.com", object_id))
        .with_groups(groups.iter().map(|g| g.to_string()).collect());
    JwtTokenValidator::encode(SECRET, &claims).unwrap()
}

/// Enroll a device for `object_id` and log it in
pub async fn enroll_and_login(api: &ApiServer, serial: &str, object_id: &str, groups: &[&str]) -> Session {
    let token = token(object_id, groups);
    api.enroll_device(&token, serial, "linux", &format!("device-key-{}", serial))
        .await
        .expect("enroll");
    api.login(&token, serial, "linux", "1.0.0")
        .await
        .expect("login")
}

pub fn gateway(name: &str, groups: &[&str], privileged: bool) -> Gateway {
    Gateway {
        name: name.to_string(),
        public_key: format!("gateway-key-{}", name),
        endpoint: "198.51.100.7:51820".to_string(),
        ipv4: "10.255.32.1".to_string(),
        routes_ipv4: vec!["10.0.0.0/24".to_string()],
        access_group_ids: groups.iter().map(|g| g.to_string()).collect(),
        requires_privileged_access: privileged,
        password_hash: gateway_hash(),
        ..Default::default()
    }
}

pub async fn add_gateway(store: &DbStore, gateway: &Gateway) {
    store.add_gateway(gateway).await.expect("add gateway");
}
