//! Mutable agent runtime state shared by the states

use std::io;
use std::path::PathBuf;
use std::sync::RwLock;

use wardgate_proto::{Enrollment, Gateway, InterfaceConfig, Session, Tenant};

use crate::config::AgentConfig;

const TUNNEL_MTU: u16 = 1360;

/// Runtime view of the device: identity, credentials and enrollment.
pub trait RuntimeConfig: Send + Sync {
    fn serial(&self) -> String;
    fn platform(&self) -> String;
    fn public_key(&self) -> String;

    fn session(&self) -> Option<Session>;
    fn set_session(&self, session: Session);
    fn clear_session(&self);

    fn token(&self) -> Option<String>;
    fn set_token(&self, token: String);
    fn clear_token(&self);

    fn enrollment(&self) -> Option<Enrollment>;
    fn set_enrollment(&self, enrollment: Enrollment) -> io::Result<()>;

    /// Tunnel interface definition for `peers`
    fn interface_config(&self, peers: Vec<Gateway>) -> InterfaceConfig;

    fn tenants(&self) -> Vec<Tenant>;
}

#[derive(Default)]
struct Credentials {
    session: Option<Session>,
    token: Option<String>,
    enrollment: Option<Enrollment>,
}

pub struct AgentRuntime {
    serial: String,
    platform: String,
    tenant: String,
    private_key: String,
    public_key: String,
    enrollment_path: Option<PathBuf>,
    credentials: RwLock<Credentials>,
}

impl AgentRuntime {
    /// Build from config, picking up an enrollment record left by a previous run.
    pub fn new(config: &AgentConfig) -> io::Result<Self> {
        let enrollment = match std::fs::read_to_string(&config.enrollment_path) {
            Ok(json) => Some(serde_json::from_str::<Enrollment>(&json)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        if let Some(enrollment) = &enrollment {
            tracing::debug!(ipv4 = %enrollment.device_ipv4, "Loaded enrollment record");
        }

        Ok(Self {
            serial: config.serial.clone(),
            platform: config.platform.clone(),
            tenant: config.tenant.clone(),
            private_key: config.private_key.clone(),
            public_key: config.public_key.clone(),
            enrollment_path: Some(config.enrollment_path.clone()),
            credentials: RwLock::new(Credentials {
                enrollment,
                ..Default::default()
            }),
        })
    }

    /// Runtime that keeps everything in memory
    pub fn in_memory(serial: &str, platform: &str, public_key: &str) -> Self {
        Self {
            serial: serial.to_string(),
            platform: platform.to_string(),
            tenant: "default".to_string(),
            private_key: String::new(),
            public_key: public_key.to_string(),
            enrollment_path: None,
            credentials: RwLock::new(Credentials::default()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Credentials> {
        self.credentials
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Credentials> {
        self.credentials
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RuntimeConfig for AgentRuntime {
    fn serial(&self) -> String {
        self.serial.clone()
    }

    fn platform(&self) -> String {
        self.platform.clone()
    }

    fn public_key(&self) -> String {
        self.public_key.clone()
    }

    fn session(&self) -> Option<Session> {
        self.read().session.clone()
    }

    fn set_session(&self, session: Session) {
        self.write().session = Some(session);
    }

    fn clear_session(&self) {
        self.write().session = None;
    }

    fn token(&self) -> Option<String> {
        self.read().token.clone()
    }

    fn set_token(&self, token: String) {
        self.write().token = Some(token);
    }

    fn clear_token(&self) {
        self.write().token = None;
    }

    fn enrollment(&self) -> Option<Enrollment> {
        self.read().enrollment.clone()
    }

    fn set_enrollment(&self, enrollment: Enrollment) -> io::Result<()> {
        if let Some(path) = &self.enrollment_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(&enrollment)?)?;
        }
        self.write().enrollment = Some(enrollment);
        Ok(())
    }

    fn interface_config(&self, peers: Vec<Gateway>) -> InterfaceConfig {
        let address = self
            .enrollment()
            .map(|e| format!("{}/32", e.device_ipv4))
            .unwrap_or_default();

        InterfaceConfig {
            private_key: self.private_key.clone(),
            address,
            listen_port: None,
            mtu: Some(TUNNEL_MTU),
            peers,
        }
    }

    fn tenants(&self) -> Vec<Tenant> {
        vec![Tenant {
            name: self.tenant.clone(),
            active: true,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrollment() -> Enrollment {
        Enrollment {
            device_ipv4: "10.255.24.9".to_string(),
            control_plane: Gateway {
                name: "wardgate-apiserver".to_string(),
                ipv4: "10.255.24.1".to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_enrollment_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig {
            serial: "serial-1".to_string(),
            enrollment_path: dir.path().join("enrollment.json"),
            ..Default::default()
        };

        let runtime = AgentRuntime::new(&config).unwrap();
        assert!(runtime.enrollment().is_none());
        runtime.set_enrollment(enrollment()).unwrap();

        let restarted = AgentRuntime::new(&config).unwrap();
        assert_eq!(restarted.enrollment(), Some(enrollment()));
    }

    #[test]
    fn test_interface_uses_enrolled_address() {
        let runtime = AgentRuntime::in_memory("serial-1", "linux", "pub");
        runtime.set_enrollment(enrollment()).unwrap();

        let iface = runtime.interface_config(vec![enrollment().control_plane]);
        assert_eq!(iface.address, "10.255.24.9/32");
        assert_eq!(iface.peer_names(), vec!["wardgate-apiserver"]);
    }
}
