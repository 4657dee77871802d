//! Control plane core: login, enrollment and change propagation

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use wardgate_auth::TokenValidator;
use wardgate_db::{NewDevice, Store, StoreError};
use wardgate_proto::{Device, Enrollment, Gateway, Session};

use crate::config::{ApiServerConfig, CONTROL_PLANE_PEER_NAME};
use crate::error::ControlError;
use crate::metrics::Metrics;
use crate::privileged::PrivilegedAccess;
use crate::session_store::SessionStore;
use crate::triggers::Triggers;

const HEALTH_FEED_CAPACITY: usize = 256;

/// Destination for configuration pushes on an open stream
#[async_trait]
pub trait PushSink<T>: Send {
    async fn push(&mut self, item: T) -> Result<(), ControlError>;
}

#[async_trait]
impl<T: Send + 'static> PushSink<T> for mpsc::Sender<T> {
    async fn push(&mut self, item: T) -> Result<(), ControlError> {
        self.send(item).await.map_err(|_| ControlError::StreamClosed)
    }
}

/// Shared control plane state; cheap to clone, one clone per connection.
#[derive(Clone)]
pub struct ApiServer {
    pub(crate) config: Arc<ApiServerConfig>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) sessions: Arc<SessionStore>,
    pub(crate) devices: Arc<Triggers<i64>>,
    pub(crate) gateways: Arc<Triggers<String>>,
    pub(crate) health_feed: broadcast::Sender<Device>,
    pub(crate) validator: Arc<dyn TokenValidator>,
    pub(crate) privileged: Arc<dyn PrivilegedAccess>,
    pub(crate) metrics: Arc<Metrics>,
}

impl ApiServer {
    pub fn new(
        config: ApiServerConfig,
        store: Arc<dyn Store>,
        validator: Arc<dyn TokenValidator>,
        privileged: Arc<dyn PrivilegedAccess>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (health_feed, _) = broadcast::channel(HEALTH_FEED_CAPACITY);
        Self {
            config: Arc::new(config),
            sessions: Arc::new(SessionStore::new(store.clone())),
            store,
            devices: Arc::new(Triggers::new("device")),
            gateways: Arc::new(Triggers::new("gateway")),
            health_feed,
            validator,
            privileged,
            metrics,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn device_triggers(&self) -> &Triggers<i64> {
        &self.devices
    }

    pub fn gateway_triggers(&self) -> &Triggers<String> {
        &self.gateways
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn config(&self) -> &ApiServerConfig {
        &self.config
    }

    /// Rebuild the session cache from the store
    pub async fn warmup(&self) -> Result<usize, ControlError> {
        Ok(self.sessions.warmup().await?)
    }

    /// Peer entry devices install to reach the control plane through the tunnel
    pub fn control_plane_peer(&self) -> Gateway {
        let ipv4 = self
            .config
            .device_network
            .hosts()
            .next()
            .map(|ip| ip.to_string())
            .unwrap_or_default();

        Gateway {
            name: CONTROL_PLANE_PEER_NAME.to_string(),
            public_key: self.config.control_plane_public_key.clone(),
            endpoint: self.config.control_plane_endpoint.clone(),
            ipv4,
            ..Default::default()
        }
    }

    /// Exchange an identity token for a session, replacing the device's previous one.
    pub async fn login(
        &self,
        token: &str,
        serial: &str,
        platform: &str,
        version: &str,
    ) -> Result<Session, ControlError> {
        let version = if version.is_empty() { "unknown" } else { version };
        self.metrics
            .login_requests
            .with_label_values(&[version])
            .inc();

        let identity = self
            .validator
            .validate(token)
            .await
            .map_err(|e| ControlError::Unauthenticated(format!("login: {}", e)))?;

        let device = match self.store.read_device_by_serial_platform(serial, platform).await {
            Ok(device) => device,
            Err(StoreError::NotFound(_)) => {
                return Err(ControlError::Unauthenticated(format!(
                    "login: device {} ({}) is not enrolled",
                    serial, platform
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let expiry = Utc::now()
            + chrono::Duration::from_std(self.config.session_lifetime)
                .map_err(|e| ControlError::Internal(e.to_string()))?;

        let session = Session {
            key: uuid::Uuid::new_v4().simple().to_string(),
            device,
            object_id: identity.object_id,
            groups: identity.groups,
            expiry,
        };
        self.sessions.set(session.clone()).await?;

        tracing::info!(
            device_id = session.device.id,
            serial = %serial,
            groups = session.groups.len(),
            "Device logged in"
        );

        // An older stream for this device must learn that its session is gone.
        self.devices.fire(&session.device.id);
        self.gateways.fire_all();
        Ok(session)
    }

    /// Create or refresh the device record and hand back its tunnel parameters.
    pub async fn enroll_device(
        &self,
        token: &str,
        serial: &str,
        platform: &str,
        public_key: &str,
    ) -> Result<Enrollment, ControlError> {
        let identity = self
            .validator
            .validate(token)
            .await
            .map_err(|e| ControlError::Unauthenticated(format!("enroll: {}", e)))?;

        if serial.is_empty() || platform.is_empty() || public_key.is_empty() {
            return Err(ControlError::InvalidArgument(
                "serial, platform and public key are required".to_string(),
            ));
        }

        let device = self
            .store
            .enroll_device(NewDevice {
                serial: serial.to_string(),
                platform: platform.to_string(),
                public_key: public_key.to_string(),
                username: identity.username,
                healthy: self.config.new_devices_healthy,
            })
            .await
            .map_err(|e| ControlError::DataLoss(e.to_string()))?;

        Ok(Enrollment {
            device_ipv4: device.ipv4,
            control_plane: self.control_plane_peer(),
        })
    }

    /// Entry point for the health checker: propagate a fresh device snapshot.
    pub async fn refresh_device(&self, device: Device) {
        self.sessions.refresh_device(&device).await;
        let device_id = device.id;
        // No receivers just means no device stream is open.
        let _ = self.health_feed.send(device);
        self.devices.fire(&device_id);
        self.gateways.fire_all();
    }

    pub fn subscribe_health(&self) -> broadcast::Receiver<Device> {
        self.health_feed.subscribe()
    }
}
