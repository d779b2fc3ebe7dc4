use parking_lot::Mutex;
use tracing::{debug, warn};

use badgecast_core::{BadgeModel, ScopeId};
use badgecast_telemetry::metrics;

use crate::repo::BadgeRepo;

struct Backing {
    repo: BadgeRepo,
    scope: ScopeId,
}

/// Holder of the last-known badge.
///
/// `get`, `set` and `clear` are serialized by one mutex, so a reader never
/// sees a partially applied update. When backed by a [`BadgeRepo`], writes go
/// through to SQLite while the lock is held; persistence failures are logged
/// and counted but never surfaced.
pub struct BadgeStore {
    current: Mutex<Option<BadgeModel>>,
    backing: Option<Backing>,
}

impl BadgeStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            current: Mutex::new(None),
            backing: None,
        }
    }

    /// A store persisted under `scope`, seeded with whatever was saved there.
    pub fn persistent(repo: BadgeRepo, scope: ScopeId) -> Self {
        let initial = match repo.load(&scope) {
            Ok(badge) => badge,
            Err(e) => {
                warn!(scope = %scope, error = %e, "failed to load cached badge, starting empty");
                metrics::record_persist_failure();
                None
            }
        };
        debug!(scope = %scope, restored = initial.is_some(), "badge store opened");

        Self {
            current: Mutex::new(initial),
            backing: Some(Backing { repo, scope }),
        }
    }

    pub fn get(&self) -> Option<BadgeModel> {
        self.current.lock().clone()
    }

    pub fn set(&self, badge: BadgeModel) {
        let mut current = self.current.lock();
        if let Some(backing) = &self.backing {
            if let Err(e) = backing.repo.save(&backing.scope, &badge) {
                warn!(scope = %backing.scope, error = %e, "failed to persist badge");
                metrics::record_persist_failure();
            }
        }
        *current = Some(badge);
    }

    pub fn clear(&self) {
        let mut current = self.current.lock();
        if let Some(backing) = &self.backing {
            if let Err(e) = backing.repo.delete(&backing.scope) {
                warn!(scope = %backing.scope, error = %e, "failed to purge persisted badge");
                metrics::record_persist_failure();
            }
        }
        *current = None;
    }

    /// Persistence scope, if this store is backed by SQLite.
    pub fn scope(&self) -> Option<&ScopeId> {
        self.backing.as_ref().map(|b| &b.scope)
    }
}

impl Default for BadgeStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
