use tokio_util::sync::CancellationToken;

use super::AgentContext;
use crate::statemachine::{Event, EventSender};

/// Fetch an identity token unless a live session makes it unnecessary.
pub async fn run(ctx: AgentContext, cancel: CancellationToken, events: EventSender) {
    if let Some(session) = ctx.runtime.session() {
        if !session.expired() {
            tracing::debug!(expiry = %session.expiry, "Session still valid, skipping login");
            events.send(Event::Authenticated);
            return;
        }
    }

    let token = tokio::select! {
        _ = cancel.cancelled() => return,
        token = ctx.tokens.token() => token,
    };

    match token {
        Ok(token) => {
            ctx.runtime.set_token(token);
            tracing::info!("Identity token acquired");
            events.send(Event::Authenticated);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Login failed");
            ctx.notifier.error(&format!("Login failed: {}", e));
            events.send(Event::Disconnect);
        }
    }
}
