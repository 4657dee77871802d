use tokio_util::sync::CancellationToken;

use super::AgentContext;
use crate::statemachine::{Event, EventSender};

pub async fn run(ctx: AgentContext, _cancel: CancellationToken, events: EventSender) {
    let tenants = ctx.runtime.tenants();
    ctx.status.update(|s| {
        s.connected_since = None;
        s.gateways.clear();
        s.issues.clear();
        s.tenants = tenants;
    });

    if ctx.config.auto_connect && ctx.claim_auto_connect() {
        tracing::info!("Auto-connect enabled, logging in");
        events.send(Event::Login);
        return;
    }

    events.send(Event::WaitForExternalEvent);
}
