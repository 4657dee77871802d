use tokio_util::sync::CancellationToken;

use super::AgentContext;
use crate::statemachine::{Event, EventSender};

/// Enroll the device once; later runs reuse the stored enrollment.
pub async fn run(ctx: AgentContext, cancel: CancellationToken, events: EventSender) {
    if ctx.runtime.enrollment().is_some() {
        events.send(Event::Bootstrapped);
        return;
    }

    let Some(token) = ctx.runtime.token() else {
        ctx.notifier.error("Cannot enroll this device without logging in first");
        events.send(Event::Disconnect);
        return;
    };

    let serial = ctx.runtime.serial();
    let platform = ctx.runtime.platform();
    let public_key = ctx.runtime.public_key();
    let result = tokio::select! {
        _ = cancel.cancelled() => return,
        result = ctx.enroller.enroll(&token, &serial, &platform, &public_key) => result,
    };

    let enrollment = match result {
        Ok(enrollment) => enrollment,
        Err(e) => {
            tracing::warn!(error = %e, "Enrollment failed");
            ctx.notifier.error(&format!("Unable to enroll this device: {}", e));
            events.send(Event::Disconnect);
            return;
        }
    };

    if let Err(e) = ctx.runtime.set_enrollment(enrollment) {
        tracing::error!(error = %e, "Failed to store enrollment");
        ctx.notifier.error(&format!("Unable to store enrollment: {}", e));
        events.send(Event::Disconnect);
        return;
    }

    events.send(Event::Bootstrapped);
}
