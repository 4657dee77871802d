//! Control plane settings

use std::net::SocketAddr;
use std::time::Duration;

use ipnet::Ipv4Net;

/// Name of the peer entry devices use to reach the control plane
pub const CONTROL_PLANE_PEER_NAME: &str = "wardgate-apiserver";

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub listen_addr: SocketAddr,
    pub metrics_addr: Option<SocketAddr>,
    pub session_lifetime: Duration,
    pub admin_username: String,
    /// Argon2 PHC string; admin calls are refused while empty
    pub admin_password_hash: String,
    /// Pool device tunnel addresses come from; its first host is the control plane
    pub device_network: Ipv4Net,
    /// Mark freshly enrolled devices healthy before any health report arrives
    pub new_devices_healthy: bool,
    pub control_plane_public_key: String,
    /// `host:port` devices dial for the control plane WireGuard peer
    pub control_plane_endpoint: String,
    /// How often open gateway streams recompute their peers so lapsed
    /// grants, sessions and health deadlines take effect
    pub gateway_refresh_interval: Duration,
    pub device_refresh_interval: Duration,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8099)),
            metrics_addr: None,
            session_lifetime: Duration::from_secs(10 * 60 * 60),
            admin_username: "admin".to_string(),
            admin_password_hash: String::new(),
            device_network: Ipv4Net::new_assert(std::net::Ipv4Addr::new(10, 255, 24, 0), 21),
            new_devices_healthy: false,
            control_plane_public_key: String::new(),
            control_plane_endpoint: String::new(),
            gateway_refresh_interval: Duration::from_secs(10),
            device_refresh_interval: Duration::from_secs(60),
        }
    }
}
