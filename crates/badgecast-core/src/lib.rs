pub mod errors;
pub mod fetch;
pub mod ids;
pub mod listener;
pub mod model;

pub use errors::{BadgeError, ErrorReporter, FetchError, ListenerError};
pub use fetch::BadgeFetcher;
pub use ids::{BroadcasterId, OwnerId, ScopeId};
pub use listener::{listener_fn, BadgeListener, ListenerKey};
pub use model::{BadgeCount, BadgeModel};
