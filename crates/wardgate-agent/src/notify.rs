//! User-facing notifications

pub trait Notifier: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Sends notifications to the log under the `wardgate::notify` target
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn info(&self, message: &str) {
        tracing::info!(target: "wardgate::notify", "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "wardgate::notify", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "wardgate::notify", "{}", message);
    }
}
