use std::time::Duration;

use tracing::warn;

const ENV_DELIVERY_TIMEOUT_MS: &str = "BADGECAST_DELIVERY_TIMEOUT_MS";
const ENV_REFRESH_TIMEOUT_MS: &str = "BADGECAST_REFRESH_TIMEOUT_MS";
const ENV_REFRESH_MAX_ATTEMPTS: &str = "BADGECAST_REFRESH_MAX_ATTEMPTS";
const ENV_NOTIFY_ON_CLEAR: &str = "BADGECAST_NOTIFY_ON_CLEAR";

/// Tuning for a [`BadgeBroadcaster`](crate::BadgeBroadcaster).
#[derive(Clone, Debug)]
pub struct BroadcasterConfig {
    /// Upper bound on a single listener callback. Slower callbacks are
    /// abandoned and reported as delivery failures.
    pub delivery_timeout: Duration,
    /// Upper bound on one fetch attempt during a refresh.
    pub refresh_timeout: Duration,
    /// Total fetch attempts per refresh, including the first.
    pub refresh_max_attempts: u32,
    pub refresh_base_delay: Duration,
    pub refresh_max_delay: Duration,
    /// Announce `clear_badge` to listeners through `on_badge_cleared`.
    pub notify_listeners_on_clear: bool,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(5),
            refresh_timeout: Duration::from_secs(10),
            refresh_max_attempts: 3,
            refresh_base_delay: Duration::from_millis(200),
            refresh_max_delay: Duration::from_secs(5),
            notify_listeners_on_clear: false,
        }
    }
}

impl BroadcasterConfig {
    /// Defaults with `BADGECAST_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable values are
    /// logged and ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_DELIVERY_TIMEOUT_MS) {
            self.delivery_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_REFRESH_TIMEOUT_MS) {
            self.refresh_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32>(&lookup, ENV_REFRESH_MAX_ATTEMPTS) {
            self.refresh_max_attempts = n.max(1);
        }
        if let Some(flag) = parse_var::<bool>(&lookup, ENV_NOTIFY_ON_CLEAR) {
            self.notify_listeners_on_clear = flag;
        }
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn with_refresh_attempts(mut self, attempts: u32) -> Self {
        self.refresh_max_attempts = attempts.max(1);
        self
    }

    pub fn with_refresh_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.refresh_base_delay = base;
        self.refresh_max_delay = max;
        self
    }

    pub fn with_notify_on_clear(mut self, notify: bool) -> Self {
        self.notify_listeners_on_clear = notify;
        self
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key = key, value = %raw, "ignoring unparseable config override");
            None
        }
    }
}
