use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ListenerError;
use crate::model::BadgeModel;

/// Callback invoked on every badge update.
#[async_trait]
pub trait BadgeListener: Send + Sync {
    /// Label used in logs and error reports.
    fn name(&self) -> &str {
        "anonymous"
    }

    async fn on_badge_update(&self, badge: &BadgeModel) -> Result<(), ListenerError>;

    /// Called when the badge is cleared, if the broadcaster is configured to
    /// announce clears.
    async fn on_badge_cleared(&self) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// Identity of a registered listener: the address of its `Arc` allocation.
///
/// Two clones of the same `Arc` share a key; two separately allocated
/// listeners never do while both are alive.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct ListenerKey(usize);

impl ListenerKey {
    pub fn of(listener: &Arc<dyn BadgeListener>) -> Self {
        Self(Arc::as_ptr(listener).cast::<()>() as usize)
    }
}

impl fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener@{:#x}", self.0)
    }
}

struct FnListener<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> BadgeListener for FnListener<F>
where
    F: Fn(&BadgeModel) -> Result<(), ListenerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_badge_update(&self, badge: &BadgeModel) -> Result<(), ListenerError> {
        (self.f)(badge)
    }
}

/// Wrap a synchronous closure as a listener.
pub fn listener_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn BadgeListener>
where
    F: Fn(&BadgeModel) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    Arc::new(FnListener {
        name: name.into(),
        f,
    })
}
