use badgecast_core::{BadgeError, ErrorReporter};
use tracing::warn;

/// Reports swallowed failures as `warn` events. Failure counters are
/// recorded by the delivery workers, whatever reporter is installed.
#[derive(Clone, Debug, Default)]
pub struct TracingReporter;

impl TracingReporter {
    pub fn new() -> Self {
        Self
    }
}

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &BadgeError) {
        if let BadgeError::ListenerDelivery { listener, reason } = error {
            warn!(listener = %listener, reason = %reason, "badge listener failed");
        } else {
            warn!(kind = error.error_kind(), error = %error, "badge error");
        }
    }
}
