//! Request and response frames

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::RpcStatus;
use crate::types::{
    Device, DeviceConfiguration, DeviceIssue, Enrollment, Gateway, GatewayConfiguration, Session,
};

/// Username/password pair for administrative calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

/// Frames sent by a client.
///
/// Unary requests get exactly one [`Response`]. The two configuration
/// requests turn the connection into a server-push stream that lasts until
/// either side goes away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Login {
        token: String,
        serial: String,
        platform: String,
        version: String,
    },
    EnrollDevice {
        token: String,
        serial: String,
        platform: String,
        public_key: String,
    },
    GetDeviceConfiguration {
        session_key: String,
    },
    GetGatewayConfiguration {
        gateway: String,
        password: String,
    },
    EnrollGateway {
        credentials: AdminCredentials,
        gateway: Gateway,
    },
    UpdateGateway {
        credentials: AdminCredentials,
        gateway: Gateway,
    },
    ListGateways {
        credentials: AdminCredentials,
    },
    GetSessions {
        credentials: AdminCredentials,
    },
    GrantPrivilegedAccess {
        credentials: AdminCredentials,
        gateway: String,
        user_id: String,
        duration_secs: u64,
    },
    RevokePrivilegedAccess {
        credentials: AdminCredentials,
        gateway: String,
        user_id: String,
    },
    UpdateDeviceHealth {
        credentials: AdminCredentials,
        device_id: i64,
        healthy: bool,
        issues: Vec<DeviceIssue>,
    },
}

impl Request {
    /// Short name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Login { .. } => "login",
            Request::EnrollDevice { .. } => "enroll_device",
            Request::GetDeviceConfiguration { .. } => "get_device_configuration",
            Request::GetGatewayConfiguration { .. } => "get_gateway_configuration",
            Request::EnrollGateway { .. } => "enroll_gateway",
            Request::UpdateGateway { .. } => "update_gateway",
            Request::ListGateways { .. } => "list_gateways",
            Request::GetSessions { .. } => "get_sessions",
            Request::GrantPrivilegedAccess { .. } => "grant_privileged_access",
            Request::RevokePrivilegedAccess { .. } => "revoke_privileged_access",
            Request::UpdateDeviceHealth { .. } => "update_device_health",
        }
    }
}

/// Frames sent by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Session(Session),
    Enrollment(Enrollment),
    DeviceConfiguration(DeviceConfiguration),
    GatewayConfiguration(GatewayConfiguration),
    Gateway(Gateway),
    Gateways(Vec<Gateway>),
    Sessions(Vec<Session>),
    Device(Device),
    PrivilegedGrant {
        user_id: String,
        expires: DateTime<Utc>,
    },
    Revoked(bool),
    Error(RpcStatus),
}
