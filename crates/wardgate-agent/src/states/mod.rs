//! State entry actions

pub mod authenticating;
pub mod bootstrapping;
pub mod connected;
pub mod disconnected;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::ApiDialer;
use crate::auth::TokenProvider;
use crate::backoff::Backoff;
use crate::config::AgentConfig;
use crate::enroll::Enroller;
use crate::network::NetworkConfigurer;
use crate::notify::Notifier;
use crate::prober::ProbeSettings;
use crate::runtime::RuntimeConfig;
use crate::statemachine::{EventSender, State};
use crate::status::StatusFanout;

/// Everything the entry actions work with
#[derive(Clone)]
pub struct AgentContext {
    pub config: Arc<AgentConfig>,
    pub runtime: Arc<dyn RuntimeConfig>,
    pub tokens: Arc<dyn TokenProvider>,
    pub enroller: Arc<dyn Enroller>,
    pub dialer: Arc<dyn ApiDialer>,
    pub network: Arc<dyn NetworkConfigurer>,
    pub notifier: Arc<dyn Notifier>,
    pub status: Arc<StatusFanout>,
    pub probe: ProbeSettings,
    pub backoff: Backoff,
    pub version: String,
    auto_connect_used: Arc<AtomicBool>,
}

impl AgentContext {
    pub fn new(
        config: AgentConfig,
        runtime: Arc<dyn RuntimeConfig>,
        tokens: Arc<dyn TokenProvider>,
        enroller: Arc<dyn Enroller>,
        dialer: Arc<dyn ApiDialer>,
        network: Arc<dyn NetworkConfigurer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            runtime,
            tokens,
            enroller,
            dialer,
            network,
            notifier,
            status: Arc::new(StatusFanout::new()),
            probe: ProbeSettings::default(),
            backoff: Backoff::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            auto_connect_used: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_probe_settings(mut self, probe: ProbeSettings) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// True only for the first caller per agent
    fn claim_auto_connect(&self) -> bool {
        !self.auto_connect_used.swap(true, Ordering::SeqCst)
    }
}

pub(crate) async fn enter(
    state: State,
    ctx: AgentContext,
    cancel: CancellationToken,
    events: EventSender,
) {
    tracing::debug!(state = %state, "Entering state");
    match state {
        State::Disconnected => disconnected::run(ctx, cancel, events).await,
        State::Authenticating => authenticating::run(ctx, cancel, events).await,
        State::Bootstrapping => bootstrapping::run(ctx, cancel, events).await,
        State::Connected => connected::run(ctx, cancel, events).await,
    }
}
