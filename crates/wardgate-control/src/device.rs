//! Device configuration stream handler

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use wardgate_proto::{Device, DeviceConfiguration, DeviceConfigurationStatus, Session};

use crate::api::{ApiServer, PushSink};
use crate::error::{ControlError, SessionError};
use crate::filters;

/// Removes the device trigger when the stream ends, however it ends.
struct DeviceStreamGuard<'a> {
    api: &'a ApiServer,
    device_id: i64,
}

impl Drop for DeviceStreamGuard<'_> {
    fn drop(&mut self) {
        self.api.devices.remove(&self.device_id);
        self.api.metrics.devices_connected.dec();
    }
}

impl ApiServer {
    /// Push device configuration into `sink` until the session expires, the
    /// peer goes away or `cancel` fires.
    pub async fn stream_device_configuration<S>(
        &self,
        session_key: &str,
        sink: &mut S,
        cancel: CancellationToken,
    ) -> Result<(), ControlError>
    where
        S: PushSink<DeviceConfiguration> + ?Sized,
    {
        let session = self.sessions.get(session_key).await.map_err(|e| match e {
            SessionError::Store(e) => ControlError::Store(e),
            other => ControlError::Unauthenticated(format!("get device configuration: {}", other)),
        })?;
        let device_id = session.device.id;

        let mut trigger = self.devices.add(device_id).map_err(|e| {
            ControlError::Unavailable(format!("register device stream: {}", e))
        })?;
        self.metrics.devices_connected.inc();
        let _guard = DeviceStreamGuard {
            api: self,
            device_id,
        };

        if session.groups.is_empty() {
            tracing::warn!(device_id, "Session has no groups; no gateways will be offered");
        }
        tracing::info!(device_id, expiry = %session.expiry, "Device configuration stream opened");

        let mut health = self.health_feed.subscribe();
        let mut health_open = true;
        let mut device = session.device.clone();
        let mut last_sent: Option<DeviceConfiguration> = None;

        let deadline = tokio::time::sleep(session.remaining());
        tokio::pin!(deadline);
        let period = self.config.device_refresh_interval;
        let mut refresh = tokio::time::interval_at(Instant::now() + period, period);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.devices.fire(&device_id);

        loop {
            let recompute = tokio::select! {
                _ = &mut deadline => {
                    tracing::info!(device_id, "Session expired, closing device stream");
                    self.metrics.device_streams_ended.with_label_values(&["timeout"]).inc();
                    // Gateways still list this device until they recompute
                    self.gateways.fire_all();
                    return Ok(());
                }
                _ = cancel.cancelled() => {
                    tracing::debug!(device_id, "Device stream cancelled");
                    self.metrics.device_streams_ended.with_label_values(&["context_done"]).inc();
                    return Ok(());
                }
                update = health.recv(), if health_open => {
                    match update {
                        Ok(updated) if updated.id == device_id => {
                            tracing::debug!(device_id, issues = updated.issues.len(), "Device health updated");
                            device = updated;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(device_id, skipped, "Device health feed lagged");
                        }
                        Err(RecvError::Closed) => health_open = false,
                    }
                    false
                }
                // Issue deadlines pass without any event
                _ = refresh.tick() => true,
                fired = trigger.recv() => {
                    if fired.is_none() {
                        tracing::debug!(device_id, "Device trigger closed");
                        self.metrics.device_streams_ended.with_label_values(&["trigger_closed"]).inc();
                        return Ok(());
                    }
                    true
                }
            };
            if !recompute {
                continue;
            }

            let session = match self.sessions.get(session_key).await {
                Ok(session) => session,
                Err(SessionError::NoSession) => {
                    tracing::info!(device_id, "Session replaced or removed, invalidating stream");
                    if let Err(e) = sink.push(DeviceConfiguration::invalid_session()).await {
                        tracing::warn!(device_id, error = %e, "Failed to send invalid session");
                    }
                    self.metrics.device_streams_ended.with_label_values(&["invalid_session"]).inc();
                    return Ok(());
                }
                Err(SessionError::Expired) => {
                    self.metrics.device_streams_ended.with_label_values(&["timeout"]).inc();
                    self.gateways.fire_all();
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(device_id, error = %e, "Failed to reload session");
                    continue;
                }
            };

            if newer(&session.device, &device) {
                device = session.device.clone();
            }

            let config = match self.make_device_configuration(&session, &device).await {
                Ok(config) => config,
                Err(e) => {
                    tracing::error!(device_id, error = %e, "Failed to compute device configuration");
                    continue;
                }
            };

            if last_sent.as_ref() == Some(&config) {
                tracing::trace!(device_id, "Device configuration unchanged");
                continue;
            }

            match sink.push(config.clone()).await {
                Ok(()) => {
                    tracing::debug!(
                        device_id,
                        status = ?config.status,
                        gateways = config.gateways.len(),
                        "Sent device configuration"
                    );
                    last_sent = Some(config);
                }
                Err(e) => {
                    tracing::warn!(device_id, error = %e, "Failed to send device configuration");
                }
            }
        }
    }

    pub(crate) async fn make_device_configuration(
        &self,
        session: &Session,
        device: &Device,
    ) -> Result<DeviceConfiguration, ControlError> {
        if !device.is_healthy(Utc::now()) {
            return Ok(DeviceConfiguration {
                status: DeviceConfigurationStatus::DeviceUnhealthy,
                issues: device.issues.clone(),
                gateways: Vec::new(),
            });
        }

        let gateways = self.store.read_gateways().await?;
        Ok(DeviceConfiguration {
            status: DeviceConfigurationStatus::DeviceHealthy,
            issues: device.issues.clone(),
            gateways: filters::gateways_for_groups(gateways, &session.groups),
        })
    }
}

fn newer(candidate: &Device, current: &Device) -> bool {
    match (candidate.last_updated, current.last_updated) {
        (Some(a), Some(b)) => a > b,
        (Some(_), None) => true,
        _ => false,
    }
}
