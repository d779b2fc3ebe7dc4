pub mod broadcaster;
pub mod config;
mod delivery;
pub mod lifecycle;
pub mod refresh;
pub mod source;

pub use broadcaster::BadgeBroadcaster;
pub use config::BroadcasterConfig;
pub use lifecycle::{LifecycleBinder, LifecycleBinding, LifecycleState};
pub use source::{BadgeSubscription, BadgeUpdateSource};
