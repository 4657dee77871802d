//! Fakes shared by the agent integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use wardgate_agent::{
    AgentConfig, AgentContext, AgentRuntime, ApiConnection, ApiDialer, Backoff,
    DeviceConfigStream, Enroller, NetworkConfigurer, NetworkError, Notifier, ProbeSettings,
    StaticTokenProvider, StatusFanout, SyncError,
};
use wardgate_proto::{
    AgentStatus, Device, DeviceConfiguration, DeviceConfigurationStatus, Enrollment, Gateway,
    InterfaceConfig, Session,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Note {
    Info(String),
    Warn(String),
    Error(String),
}

#[derive(Default)]
pub struct RecordingNotifier {
    notes: Mutex<Vec<Note>>,
}

impl RecordingNotifier {
    pub fn notes(&self) -> Vec<Note> {
        self.notes.lock().unwrap().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.notes()
            .into_iter()
            .filter_map(|n| match n {
                Note::Warn(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.notes()
            .into_iter()
            .filter_map(|n| match n {
                Note::Error(m) => Some(m),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn info(&self, message: &str) {
        self.notes.lock().unwrap().push(Note::Info(message.to_string()));
    }

    fn warn(&self, message: &str) {
        self.notes.lock().unwrap().push(Note::Warn(message.to_string()));
    }

    fn error(&self, message: &str) {
        self.notes.lock().unwrap().push(Note::Error(message.to_string()));
    }
}

/// Remembers every applied interface configuration
#[derive(Default)]
pub struct RecordingNetwork {
    applied: Mutex<Vec<InterfaceConfig>>,
    teardowns: Mutex<usize>,
}

impl RecordingNetwork {
    pub fn applied(&self) -> Vec<InterfaceConfig> {
        self.applied.lock().unwrap().clone()
    }

    pub fn last_peers(&self) -> Vec<String> {
        self.applied()
            .last()
            .map(|c| c.peers.iter().map(|p| p.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn teardowns(&self) -> usize {
        *self.teardowns.lock().unwrap()
    }
}

#[async_trait]
impl NetworkConfigurer for RecordingNetwork {
    async fn configure(&self, config: InterfaceConfig) -> Result<(), NetworkError> {
        self.applied.lock().unwrap().push(config);
        Ok(())
    }

    async fn teardown(&self) -> Result<(), NetworkError> {
        *self.teardowns.lock().unwrap() += 1;
        Ok(())
    }
}

/// What the next dial produces
pub enum Script {
    /// The dial itself fails
    DialError(SyncError),
    /// Login fails
    LoginError(SyncError),
    /// Stream yields these items, then stays open
    Stream(Vec<Result<Option<DeviceConfiguration>, SyncError>>),
}

/// Plays back scripts in order; once they run out every dial is unavailable.
#[derive(Default)]
pub struct ScriptedDialer {
    scripts: Mutex<VecDeque<Script>>,
    dials: Mutex<usize>,
}

impl ScriptedDialer {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            dials: Mutex::new(0),
        }
    }

    pub fn dials(&self) -> usize {
        *self.dials.lock().unwrap()
    }
}

#[async_trait]
impl ApiDialer for ScriptedDialer {
    async fn dial(&self) -> Result<Box<dyn ApiConnection>, SyncError> {
        *self.dials.lock().unwrap() += 1;
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            None => Err(SyncError::Unavailable("no route".to_string())),
            Some(Script::DialError(e)) => Err(e),
            Some(Script::LoginError(e)) => Ok(Box::new(ScriptedConnection {
                login_error: Some(e),
                pushes: VecDeque::new(),
            })),
            Some(Script::Stream(pushes)) => Ok(Box::new(ScriptedConnection {
                login_error: None,
                pushes: pushes.into(),
            })),
        }
    }
}

struct ScriptedConnection {
    login_error: Option<SyncError>,
    pushes: VecDeque<Result<Option<DeviceConfiguration>, SyncError>>,
}

#[async_trait]
impl ApiConnection for ScriptedConnection {
    async fn login(
        &mut self,
        _token: &str,
        serial: &str,
        platform: &str,
        _version: &str,
    ) -> Result<Session, SyncError> {
        match self.login_error.take() {
            Some(e) => Err(e),
            None => Ok(session(serial, platform)),
        }
    }

    async fn enroll(
        &mut self,
        _token: &str,
        _serial: &str,
        _platform: &str,
        _public_key: &str,
    ) -> Result<Enrollment, SyncError> {
        Ok(enrollment())
    }

    async fn device_configuration(
        self: Box<Self>,
        _session_key: &str,
    ) -> Result<Box<dyn DeviceConfigStream>, SyncError> {
        Ok(Box::new(ScriptedStream {
            pushes: self.pushes,
        }))
    }
}

struct ScriptedStream {
    pushes: VecDeque<Result<Option<DeviceConfiguration>, SyncError>>,
}

#[async_trait]
impl DeviceConfigStream for ScriptedStream {
    async fn recv(&mut self) -> Result<Option<DeviceConfiguration>, SyncError> {
        match self.pushes.pop_front() {
            Some(push) => push,
            None => std::future::pending().await,
        }
    }
}

/// Enrollment that hands out a fixed record
pub struct FixedEnroller;

#[async_trait]
impl Enroller for FixedEnroller {
    async fn enroll(
        &self,
        _token: &str,
        _serial: &str,
        _platform: &str,
        _public_key: &str,
    ) -> Result<Enrollment, SyncError> {
        Ok(enrollment())
    }
}

pub fn session(serial: &str, platform: &str) -> Session {
    Session {
        key: "session-key".to_string(),
        device: Device {
            id: 1,
            serial: serial.to_string(),
            platform: platform.to_string(),
            public_key: "device-pub".to_string(),
            username: "user@example.com".to_string(),
            ipv4: "10.255.24.2".to_string(),
            healthy: true,
            issues: Vec::new(),
            last_updated: None,
        },
        object_id: "user".to_string(),
        groups: vec!["staff".to_string()],
        expiry: Utc::now() + chrono::Duration::hours(1),
    }
}

pub fn enrollment() -> Enrollment {
    Enrollment {
        device_ipv4: "10.255.24.2".to_string(),
        control_plane: Gateway {
            name: "control-plane".to_string(),
            public_key: "cp-pub".to_string(),
            ipv4: "10.255.24.1".to_string(),
            ..Default::default()
        },
    }
}

pub fn gateway(name: &str) -> Gateway {
    Gateway {
        name: name.to_string(),
        public_key: format!("{}-pub", name),
        ipv4: String::new(),
        routes_ipv4: vec!["10.0.0.0/24".to_string()],
        ..Default::default()
    }
}

pub fn healthy(gateways: Vec<Gateway>) -> Result<Option<DeviceConfiguration>, SyncError> {
    Ok(Some(DeviceConfiguration {
        status: DeviceConfigurationStatus::DeviceHealthy,
        issues: Vec::new(),
        gateways,
    }))
}

pub struct Fixture {
    pub ctx: AgentContext,
    pub runtime: Arc<AgentRuntime>,
    pub notifier: Arc<RecordingNotifier>,
    pub network: Arc<RecordingNetwork>,
    pub dialer: Arc<ScriptedDialer>,
}

pub fn fixture(config: AgentConfig, token: Option<&str>, scripts: Vec<Script>) -> Fixture {
    let runtime = Arc::new(AgentRuntime::in_memory("serial-1", "linux", "device-pub"));
    let notifier = Arc::new(RecordingNotifier::default());
    let network = Arc::new(RecordingNetwork::default());
    let dialer = Arc::new(ScriptedDialer::new(scripts));

    let ctx = AgentContext::new(
        config,
        runtime.clone(),
        Arc::new(StaticTokenProvider::new(token.map(str::to_string))),
        Arc::new(FixedEnroller),
        dialer.clone(),
        network.clone(),
        notifier.clone(),
    )
    .with_backoff(Backoff::new(Duration::from_millis(1), Duration::from_millis(5)))
    .with_probe_settings(ProbeSettings {
        timeout: Duration::from_millis(50),
        ..Default::default()
    });

    Fixture {
        ctx,
        runtime,
        notifier,
        network,
        dialer,
    }
}

/// Wait until a published status satisfies `done`
pub async fn wait_for_status(
    fanout: &StatusFanout,
    done: impl Fn(&AgentStatus) -> bool,
) -> AgentStatus {
    let (id, mut rx) = fanout.subscribe();
    let status = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(status) = rx.recv().await {
            if done(&status) {
                return status;
            }
        }
        panic!("status fanout closed");
    })
    .await
    .expect("timed out waiting for status");
    fanout.unsubscribe(&id);
    status
}

/// Poll `check` until it holds
pub async fn eventually(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

