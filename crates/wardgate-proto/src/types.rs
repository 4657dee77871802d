//! Records exchanged between the control plane, gateways and devices

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How bad a device health issue is.
///
/// The severity decides how long the device keeps network access after the
/// issue is first detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Notice,
    Warning,
    Danger,
    Critical,
}

impl Severity {
    /// Grace period between detection and loss of access
    pub fn grace_period(self) -> Duration {
        match self {
            Severity::Critical => Duration::zero(),
            Severity::Danger => Duration::hours(1),
            Severity::Warning => Duration::hours(48),
            Severity::Notice => Duration::days(7),
            Severity::Info => Duration::days(30),
        }
    }
}

/// An outstanding health problem on a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIssue {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Once this deadline passes the device is considered unhealthy
    pub resolve_before: DateTime<Utc>,
}

impl DeviceIssue {
    /// Create an issue whose deadline follows from its severity
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            detected_at,
            last_updated: detected_at,
            resolve_before: detected_at + severity.grace_period(),
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.resolve_before <= now
    }
}

/// An enrolled endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub serial: String,
    pub platform: String,
    pub public_key: String,
    pub username: String,
    /// Tunnel address handed out at enrollment
    pub ipv4: String,
    pub healthy: bool,
    pub issues: Vec<DeviceIssue>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Device {
    /// A device is healthy when its flag is set and no issue is past its deadline.
    pub fn is_healthy(&self, now: DateTime<Utc>) -> bool {
        self.healthy && !self.issues.iter().any(|issue| issue.is_overdue(now))
    }
}

/// A tunnel exit point that devices may peer with
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Gateway {
    pub name: String,
    pub public_key: String,
    /// `host:port` the WireGuard peer listens on
    pub endpoint: String,
    pub ipv4: String,
    pub ipv6: String,
    pub routes_ipv4: Vec<String>,
    pub routes_ipv6: Vec<String>,
    pub access_group_ids: Vec<String>,
    pub requires_privileged_access: bool,
    /// Argon2 PHC string; always blank outside the control plane
    pub password_hash: String,
    /// Liveness as observed by the agent
    pub healthy: bool,
}

impl Gateway {
    /// Addresses routed through this gateway: configured routes plus the gateway itself.
    pub fn allowed_ips(&self) -> Vec<String> {
        let mut ips = self.routes_ipv4.clone();
        if !self.ipv4.is_empty() {
            ips.push(format!("{}/32", self.ipv4));
        }
        if !self.ipv6.is_empty() {
            ips.push(format!("{}/128", self.ipv6));
            ips.extend(self.routes_ipv6.iter().cloned());
        }
        ips
    }

    /// Copy with the password hash removed
    pub fn redacted(&self) -> Self {
        Self {
            password_hash: String::new(),
            ..self.clone()
        }
    }
}

/// Carry over the `healthy` flag from a previous snapshot, matching gateways by name.
pub fn merge_gateway_health(existing: &[Gateway], incoming: Vec<Gateway>) -> Vec<Gateway> {
    incoming
        .into_iter()
        .map(|mut gateway| {
            if let Some(previous) = existing.iter().find(|g| g.name == gateway.name) {
                gateway.healthy = previous.healthy;
            }
            gateway
        })
        .collect()
}

/// Proof of a successful login for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    pub device: Device,
    /// Identity provider object id of the user
    pub object_id: String,
    pub groups: Vec<String>,
    pub expiry: DateTime<Utc>,
}

impl Session {
    pub fn expired(&self) -> bool {
        self.expired_at(Utc::now())
    }

    pub fn expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self) -> std::time::Duration {
        (self.expiry - Utc::now()).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceConfigurationStatus {
    DeviceHealthy,
    DeviceUnhealthy,
    InvalidSession,
}

/// One push on the device configuration stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    pub status: DeviceConfigurationStatus,
    pub issues: Vec<DeviceIssue>,
    pub gateways: Vec<Gateway>,
}

impl DeviceConfiguration {
    pub fn invalid_session() -> Self {
        Self {
            status: DeviceConfigurationStatus::InvalidSession,
            issues: Vec::new(),
            gateways: Vec::new(),
        }
    }
}

/// One push on the gateway configuration stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfiguration {
    /// Devices allowed to peer with the gateway, ordered by id
    pub devices: Vec<Device>,
    pub routes_ipv4: Vec<String>,
    pub routes_ipv6: Vec<String>,
}

/// Result of enrolling a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub device_ipv4: String,
    /// Peer entry for reaching the control plane through the tunnel
    pub control_plane: Gateway,
}

/// Externally visible agent connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    Disconnected,
    Authenticating,
    Bootstrapping,
    Connected,
    Unhealthy,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentState::Disconnected => "Disconnected",
            AgentState::Authenticating => "Authenticating",
            AgentState::Bootstrapping => "Bootstrapping",
            AgentState::Connected => "Connected",
            AgentState::Unhealthy => "Unhealthy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub name: String,
    pub active: bool,
}

/// Snapshot published to local status subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub connection_state: AgentState,
    pub connected_since: Option<DateTime<Utc>>,
    pub gateways: Vec<Gateway>,
    pub issues: Vec<DeviceIssue>,
    pub tenants: Vec<Tenant>,
}

impl AgentStatus {
    pub fn new(connection_state: AgentState) -> Self {
        Self {
            connection_state,
            connected_since: None,
            gateways: Vec::new(),
            issues: Vec::new(),
            tenants: Vec::new(),
        }
    }
}
