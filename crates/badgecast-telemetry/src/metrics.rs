//! Metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade; without an installed
//! recorder every call is a no-op.

use metrics::{counter, gauge};

pub const PUBLISH_TOTAL: &str = "badge_publish_total";
pub const DELIVERIES_TOTAL: &str = "badge_deliveries_total";
pub const DELIVERY_FAILURES_TOTAL: &str = "badge_delivery_failures_total";
pub const LISTENERS: &str = "badge_listeners";
pub const SUBSCRIBERS: &str = "badge_subscribers";
pub const REFRESH_TOTAL: &str = "badge_refresh_total";
pub const PERSIST_FAILURES_TOTAL: &str = "badge_store_persist_failures_total";

pub fn record_publish() {
    counter!(PUBLISH_TOTAL).increment(1);
}

pub fn record_delivery() {
    counter!(DELIVERIES_TOTAL).increment(1);
}

pub fn record_delivery_failure(kind: &'static str) {
    counter!(DELIVERY_FAILURES_TOTAL, "kind" => kind).increment(1);
}

pub fn set_listener_count(n: usize) {
    gauge!(LISTENERS).set(n as f64);
}

pub fn set_subscriber_count(n: usize) {
    gauge!(SUBSCRIBERS).set(n as f64);
}

/// `status` is "success" or "failure".
pub fn record_refresh(status: &'static str) {
    counter!(REFRESH_TOTAL, "status" => status).increment(1);
}

pub fn record_persist_failure() {
    counter!(PERSIST_FAILURES_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_publish();
        record_delivery();
        record_delivery_failure("panic");
        set_listener_count(3);
        set_subscriber_count(1);
        record_refresh("success");
        record_persist_failure();
    }
}
