/// Failure returned by a listener callback.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ListenerError {
    #[error("listener failed: {0}")]
    Failed(String),
}

impl ListenerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Failure from the data collaborator behind a badge refresh.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    // Retryable
    #[error("network error: {0}")]
    Network(String),
    #[error("badge service unavailable")]
    Unavailable,
    #[error("fetch timed out")]
    Timeout,

    // Fatal
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Unavailable | Self::Timeout)
    }
}

/// Errors surfaced by the badge subsystem. None of them are process-fatal.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BadgeError {
    /// A single listener failed; isolated from every other listener.
    #[error("delivery to listener {listener} failed: {reason}")]
    ListenerDelivery { listener: String, reason: String },

    /// The refresh collaborator failed. The cached badge is left untouched.
    #[error("badge refresh failed: {0}")]
    RefreshFailed(#[from] FetchError),

    /// Operation attempted after teardown.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No async runtime available to host delivery workers.
    #[error("runtime unavailable: {0}")]
    Runtime(String),
}

impl BadgeError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ListenerDelivery { .. } => "listener_delivery",
            Self::RefreshFailed(_) => "refresh_failed",
            Self::InvalidState(_) => "invalid_state",
            Self::Runtime(_) => "runtime",
        }
    }
}

/// Observability sink for failures that are swallowed locally.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &BadgeError);
}
