use async_trait::async_trait;

use crate::errors::FetchError;
use crate::model::BadgeCount;

/// Out-of-band source of the current badge figures, used by manual refresh.
#[async_trait]
pub trait BadgeFetcher: Send + Sync {
    async fn fetch_badge(&self) -> Result<BadgeCount, FetchError>;
}
