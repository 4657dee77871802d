//! Connected state: the configuration sync loop
//!
//! Keeps one device configuration stream open against the control plane and
//! reconciles the local tunnel with every push. Stream failures are
//! classified into retry, reconnect, re-authenticate, idle or fatal.

use std::convert::Infallible;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use wardgate_proto::{
    merge_gateway_health, AgentState, DeviceConfiguration, DeviceConfigurationStatus, Gateway,
};

use super::AgentContext;
use crate::backoff::Backoff;
use crate::error::SyncError;
use crate::prober::Prober;
use crate::statemachine::{Event, EventSender};

/// What the sync loop does after a stream attempt ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Wait out the backoff, then dial again
    Retry,
    /// Dial again straight away with a fresh backoff
    Reconnect,
    /// Forget credentials and disconnect
    Reauthenticate,
    /// Stop syncing and wait for the user
    Idle,
    /// Disconnect
    Fatal,
}

pub fn classify(err: &SyncError) -> Outcome {
    match err {
        SyncError::Unavailable(_) => Outcome::Retry,
        SyncError::LostConnection(_) => Outcome::Reconnect,
        SyncError::Unauthenticated(_) | SyncError::InvalidSession => Outcome::Reauthenticate,
        SyncError::Canceled | SyncError::DeadlineExceeded => Outcome::Idle,
        SyncError::Unexpected(_) => Outcome::Fatal,
    }
}

pub async fn run(ctx: AgentContext, cancel: CancellationToken, events: EventSender) {
    let Some(enrollment) = ctx.runtime.enrollment() else {
        tracing::error!("Entered Connected without an enrollment record");
        events.send(Event::Disconnect);
        return;
    };

    let tenants = ctx.runtime.tenants();
    ctx.status.update(|s| {
        s.connected_since = Some(Utc::now());
        s.tenants = tenants;
    });

    let control_plane = enrollment.control_plane;
    let base = ctx.runtime.interface_config(vec![control_plane.clone()]);
    if let Err(e) = ctx.network.configure(base).await {
        tracing::error!(error = %e, "Failed to configure tunnel");
        ctx.notifier.error(&format!("Unable to configure the tunnel: {}", e));
        events.send(Event::Disconnect);
        return;
    }

    let next = {
        let mut sync = SyncLoop::new(&ctx, control_plane, &cancel);
        sync.run().await
    };

    if let Err(e) = ctx.network.teardown().await {
        tracing::warn!(error = %e, "Failed to tear down tunnel");
    }
    // The state may stay Connected while idle, but no tunnel is up
    ctx.status.update(|s| {
        s.gateways.clear();
        s.connected_since = None;
    });

    if let Some(event) = next {
        events.send(event);
    }
}

struct SyncLoop<'a> {
    ctx: &'a AgentContext,
    cancel: &'a CancellationToken,
    control_plane: Gateway,
    backoff: Backoff,
    warned: bool,
    prober: Option<Prober>,
    last_status: Option<DeviceConfigurationStatus>,
}

impl<'a> SyncLoop<'a> {
    fn new(ctx: &'a AgentContext, control_plane: Gateway, cancel: &'a CancellationToken) -> Self {
        Self {
            ctx,
            cancel,
            control_plane,
            backoff: ctx.backoff.clone(),
            warned: false,
            prober: None,
            last_status: None,
        }
    }

    /// Returns the event to hand the state machine, or `None` when cancelled.
    async fn run(&mut self) -> Option<Event> {
        loop {
            let err = match self.sync_once().await {
                Ok(never) => match never {},
                Err(err) => err,
            };
            self.prober = None;

            if self.cancel.is_cancelled() {
                return None;
            }

            let outcome = classify(&err);
            tracing::info!(error = %err, outcome = ?outcome, attempt = self.backoff.attempts(), "Configuration stream ended");

            match outcome {
                Outcome::Retry => {
                    let delay = self.backoff.next_delay();
                    let attempt = self.backoff.attempts();
                    if attempt >= self.ctx.config.retry_warning_threshold && !self.warned {
                        self.warned = true;
                        self.ctx.notifier.warn(&format!(
                            "Unable to reach the control plane after {} attempts, still trying",
                            attempt
                        ));
                    }
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off");

                    tokio::select! {
                        _ = self.cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Outcome::Reconnect => self.backoff.reset(),
                Outcome::Reauthenticate => {
                    self.ctx.runtime.clear_session();
                    self.ctx.runtime.clear_token();
                    self.ctx
                        .notifier
                        .error(&format!("Please log in again: {}", err));
                    return Some(Event::Disconnect);
                }
                Outcome::Idle => return Some(Event::WaitForExternalEvent),
                Outcome::Fatal => {
                    self.ctx.notifier.error(&format!("Disconnected: {}", err));
                    return Some(Event::Disconnect);
                }
            }
        }
    }

    /// One dial, login and stream cycle; only ever ends in an error.
    async fn sync_once(&mut self) -> Result<Infallible, SyncError> {
        let ctx = self.ctx;
        let cancel = self.cancel;

        let mut conn = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Canceled),
            conn = ctx.dialer.dial() => conn?,
        };

        let session = match ctx.runtime.session() {
            Some(session) if !session.expired() => session,
            _ => {
                let token = ctx
                    .runtime
                    .token()
                    .ok_or_else(|| SyncError::Unauthenticated("no identity token".to_string()))?;
                let serial = ctx.runtime.serial();
                let platform = ctx.runtime.platform();
                let session = tokio::select! {
                    _ = cancel.cancelled() => return Err(SyncError::Canceled),
                    session = conn.login(&token, &serial, &platform, &ctx.version) => session?,
                };
                tracing::info!(expiry = %session.expiry, "Logged in to control plane");
                ctx.runtime.set_session(session.clone());
                session
            }
        };

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Canceled),
            stream = conn.device_configuration(&session.key) => stream?,
        };

        let deadline = tokio::time::sleep(session.remaining());
        tokio::pin!(deadline);
        let mut first = true;

        loop {
            let config = tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Canceled),
                _ = &mut deadline => return Err(SyncError::DeadlineExceeded),
                received = stream.recv() => match received {
                    Ok(Some(config)) => config,
                    Ok(None) if first => {
                        return Err(SyncError::Unavailable(
                            "stream closed before the first configuration".to_string(),
                        ))
                    }
                    Ok(None) => {
                        return Err(SyncError::LostConnection(
                            "stream closed by control plane".to_string(),
                        ))
                    }
                    // Never established, so back off instead of redialing at once
                    Err(SyncError::LostConnection(e)) if first => {
                        return Err(SyncError::Unavailable(e))
                    }
                    Err(e) => return Err(e),
                },
            };

            if first {
                first = false;
                self.backoff.reset();
                if self.warned {
                    self.warned = false;
                    ctx.notifier.info("Connection to the control plane restored");
                }
            }

            self.apply(config).await?;
        }
    }

    async fn apply(&mut self, config: DeviceConfiguration) -> Result<(), SyncError> {
        let ctx = self.ctx;

        match config.status {
            DeviceConfigurationStatus::InvalidSession => {
                ctx.runtime.clear_session();
                Err(SyncError::InvalidSession)
            }
            DeviceConfigurationStatus::DeviceUnhealthy => {
                self.prober = None;
                if self.last_status != Some(DeviceConfigurationStatus::DeviceUnhealthy) {
                    ctx.notifier.warn(
                        "This device is unhealthy; gateway access is blocked until its issues are resolved",
                    );
                }
                self.configure(vec![self.control_plane.clone()]).await?;

                let issues = config.issues;
                tracing::info!(issues = issues.len(), "Device unhealthy");
                ctx.status.update(|s| {
                    s.connection_state = AgentState::Unhealthy;
                    s.gateways.clear();
                    s.issues = issues;
                });
                self.last_status = Some(DeviceConfigurationStatus::DeviceUnhealthy);
                Ok(())
            }
            DeviceConfigurationStatus::DeviceHealthy => {
                let previous = ctx.status.current().gateways;
                let gateways = merge_gateway_health(&previous, config.gateways);

                let mut peers = Vec::with_capacity(gateways.len() + 1);
                peers.push(self.control_plane.clone());
                peers.extend(gateways.iter().cloned());
                self.configure(peers).await?;

                tracing::info!(gateways = gateways.len(), "Applied device configuration");
                let issues = config.issues;
                let snapshot = gateways.clone();
                ctx.status.update(|s| {
                    s.connection_state = AgentState::Connected;
                    s.gateways = snapshot;
                    s.issues = issues;
                });

                // Replacing the prober stops the previous one
                self.prober = Some(Prober::spawn(
                    gateways,
                    ctx.status.clone(),
                    ctx.probe.clone(),
                    self.cancel,
                ));
                self.last_status = Some(DeviceConfigurationStatus::DeviceHealthy);
                Ok(())
            }
        }
    }

    async fn configure(&self, peers: Vec<Gateway>) -> Result<(), SyncError> {
        let config = self.ctx.runtime.interface_config(peers);
        self.ctx
            .network
            .configure(config)
            .await
            .map_err(|e| SyncError::Unexpected(format!("configure tunnel: {}", e)))
    }
}
