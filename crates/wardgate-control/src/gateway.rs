//! Gateway configuration stream handler

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use wardgate_auth::verify_password;
use wardgate_db::StoreError;
use wardgate_proto::GatewayConfiguration;

use crate::api::{ApiServer, PushSink};
use crate::error::{ControlError, TriggerError};
use crate::filters;

struct GatewayStreamGuard<'a> {
    api: &'a ApiServer,
    name: String,
}

impl Drop for GatewayStreamGuard<'_> {
    fn drop(&mut self) {
        self.api.gateways.remove(&self.name);
        self.api
            .metrics
            .gateway_connected
            .with_label_values(&[self.name.as_str()])
            .set(0);
    }
}

impl ApiServer {
    /// Check a gateway's name and password against the stored hash
    pub async fn authenticate_gateway(&self, name: &str, password: &str) -> Result<(), ControlError> {
        let gateway = match self.store.read_gateway(name).await {
            Ok(gateway) => gateway,
            Err(StoreError::NotFound(_)) => {
                return Err(ControlError::Unauthenticated(format!(
                    "gateway {}: invalid credentials",
                    name
                )))
            }
            Err(e) => return Err(e.into()),
        };

        match verify_password(password, &gateway.password_hash) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ControlError::Unauthenticated(format!(
                "gateway {}: invalid credentials",
                name
            ))),
            Err(e) => {
                tracing::warn!(gateway = %name, error = %e, "Stored gateway password hash is unusable");
                Err(ControlError::Unauthenticated(format!(
                    "gateway {}: invalid credentials",
                    name
                )))
            }
        }
    }

    /// Push gateway configuration into `sink` until the peer goes away or
    /// `cancel` fires. Only one stream per gateway name may be open.
    pub async fn stream_gateway_configuration<S>(
        &self,
        name: &str,
        password: &str,
        sink: &mut S,
        cancel: CancellationToken,
    ) -> Result<(), ControlError>
    where
        S: PushSink<GatewayConfiguration> + ?Sized,
    {
        self.authenticate_gateway(name, password).await?;

        let mut trigger = self
            .gateways
            .add(name.to_string())
            .map_err(|TriggerError::AlreadyExists(name)| ControlError::AlreadyConnected(name))?;
        let _guard = GatewayStreamGuard {
            api: self,
            name: name.to_string(),
        };
        self.metrics
            .gateway_connected
            .with_label_values(&[name])
            .set(1);
        tracing::info!(gateway = %name, "Gateway configuration stream opened");

        let mut last_sent: Option<GatewayConfiguration> = None;
        let period = self.config.gateway_refresh_interval;
        let mut refresh = tokio::time::interval_at(Instant::now() + period, period);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.gateways.fire(&name.to_string());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(gateway = %name, "Gateway stream cancelled");
                    return Ok(());
                }
                // Grants, sessions and issue deadlines lapse without firing a trigger
                _ = refresh.tick() => {}
                fired = trigger.recv() => {
                    if fired.is_none() {
                        tracing::debug!(gateway = %name, "Gateway trigger closed");
                        return Ok(());
                    }
                }
            }

            let config = match self.make_gateway_configuration(name).await {
                Ok(config) => config,
                Err(e) => {
                    tracing::error!(gateway = %name, error = %e, "Failed to compute gateway configuration");
                    continue;
                }
            };

            if last_sent.as_ref().is_some_and(|last| same_peers(last, &config)) {
                tracing::trace!(gateway = %name, "Gateway configuration unchanged");
                continue;
            }

            match sink.push(config.clone()).await {
                Ok(()) => {
                    tracing::debug!(gateway = %name, devices = config.devices.len(), "Sent gateway configuration");
                    last_sent = Some(config);
                }
                Err(e) => {
                    tracing::warn!(gateway = %name, error = %e, "Failed to send gateway configuration");
                }
            }
        }
    }

    pub(crate) async fn make_gateway_configuration(
        &self,
        name: &str,
    ) -> Result<GatewayConfiguration, ControlError> {
        let gateway = self.store.read_gateway(name).await?;

        let users = self.privileged.privileged_users(name);
        self.metrics
            .privileged_users
            .with_label_values(&[name])
            .set(users.len() as i64);

        let sessions = self.sessions.all().await;
        let devices = filters::gateway_devices(&gateway, sessions, &users, Utc::now());
        self.metrics
            .gateway_configs_returned
            .with_label_values(&[name])
            .inc();

        Ok(GatewayConfiguration {
            devices,
            routes_ipv4: gateway.routes_ipv4,
            routes_ipv6: gateway.routes_ipv6,
        })
    }
}

/// Compares peer identity and addressing only
fn same_peers(a: &GatewayConfiguration, b: &GatewayConfiguration) -> bool {
    a.routes_ipv4 == b.routes_ipv4
        && a.routes_ipv6 == b.routes_ipv6
        && a.devices.len() == b.devices.len()
        && a.devices.iter().zip(&b.devices).all(|(x, y)| {
            x.id == y.id && x.public_key == y.public_key && x.ipv4 == y.ipv4
        })
}
