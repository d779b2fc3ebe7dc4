//! Ties listener registration to the lifecycle of a UI component.
//!
//! The broadcaster knows nothing about UI frameworks; a framework adapter
//! reports lifecycle transitions to a [`LifecycleBinding`], either directly
//! through [`LifecycleBinding::on_state`] or by feeding a `watch` channel to
//! [`LifecycleBinding::drive`].

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use badgecast_core::{BadgeListener, BroadcasterId, ListenerKey, OwnerId};

use crate::broadcaster::BadgeBroadcaster;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Created but not yet showing.
    Initialized,
    /// Visible/started: the binding holds a registration.
    Active,
    /// Stopped/backgrounded: no registration held.
    Inactive,
    /// Terminal. The binding releases its slot in the binder.
    Destroyed,
}

type BindingKey = (OwnerId, BroadcasterId);
type BindingMap = DashMap<BindingKey, Arc<LifecycleBinding>>;

struct BindingState {
    lifecycle: LifecycleState,
    listener: Arc<dyn BadgeListener>,
    registered: Option<ListenerKey>,
}

/// One owner's registration on one broadcaster.
pub struct LifecycleBinding {
    owner: OwnerId,
    broadcaster: Arc<BadgeBroadcaster>,
    state: Mutex<BindingState>,
    bindings: Weak<BindingMap>,
}

impl LifecycleBinding {
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn state(&self) -> LifecycleState {
        self.state.lock().lifecycle
    }

    /// Whether a listener is currently registered through this binding.
    pub fn is_registered(&self) -> bool {
        self.state.lock().registered.is_some()
    }

    /// Apply a lifecycle transition. Repeated transitions to the same state
    /// are no-ops; nothing happens after `Destroyed`.
    pub fn on_state(&self, next: LifecycleState) {
        let mut state = self.state.lock();
        if state.lifecycle == LifecycleState::Destroyed {
            return;
        }

        match next {
            LifecycleState::Active => {
                if state.registered.is_none() {
                    let key = self
                        .broadcaster
                        .register_badge_listener(Arc::clone(&state.listener));
                    state.registered = Some(key);
                }
            }
            LifecycleState::Initialized | LifecycleState::Inactive | LifecycleState::Destroyed => {
                if let Some(key) = state.registered.take() {
                    let _ = self.broadcaster.unregister_key(key);
                }
            }
        }

        debug!(
            owner = %self.owner,
            broadcaster = %self.broadcaster.id(),
            from = ?state.lifecycle,
            to = ?next,
            "lifecycle transition"
        );
        state.lifecycle = next;

        if next == LifecycleState::Destroyed {
            drop(state);
            self.release();
        }
    }

    /// Follow a lifecycle published on a `watch` channel until the owner is
    /// destroyed or the channel's sender is dropped (treated as destroyed).
    pub fn drive(self: &Arc<Self>, mut rx: watch::Receiver<LifecycleState>) -> JoinHandle<()> {
        let binding = Arc::clone(self);
        tokio::spawn(async move {
            let initial = *rx.borrow_and_update();
            binding.on_state(initial);
            if initial == LifecycleState::Destroyed {
                return;
            }
            while rx.changed().await.is_ok() {
                let next = *rx.borrow_and_update();
                binding.on_state(next);
                if next == LifecycleState::Destroyed {
                    return;
                }
            }
            binding.on_state(LifecycleState::Destroyed);
        })
    }

    /// Swap the callback, moving the registration over if one is held.
    /// Returns false if the binding is already destroyed.
    fn replace_listener(&self, listener: Arc<dyn BadgeListener>) -> bool {
        let mut state = self.state.lock();
        if state.lifecycle == LifecycleState::Destroyed {
            return false;
        }
        if ListenerKey::of(&state.listener) == ListenerKey::of(&listener) {
            return true;
        }
        let was_registered = state.registered.take();
        if let Some(key) = was_registered {
            let _ = self.broadcaster.unregister_key(key);
        }
        state.listener = listener;
        if was_registered.is_some() {
            let key = self
                .broadcaster
                .register_badge_listener(Arc::clone(&state.listener));
            state.registered = Some(key);
        }
        true
    }

    fn release(&self) {
        if let Some(bindings) = self.bindings.upgrade() {
            let key = (self.owner.clone(), self.broadcaster.id().clone());
            let _ = bindings.remove_if(&key, |_, b| std::ptr::eq(Arc::as_ptr(b), self));
        }
    }
}

/// Keeps at most one binding per (owner, broadcaster) pair.
pub struct LifecycleBinder {
    bindings: Arc<BindingMap>,
}

impl LifecycleBinder {
    pub fn new() -> Self {
        Self {
            bindings: Arc::new(DashMap::new()),
        }
    }

    /// Bind `listener` to the lifecycle of `owner` on `broadcaster`.
    ///
    /// Binding the same pair again returns the existing binding with its
    /// callback replaced, so a recreated component never leaves a second
    /// registration behind. A binding caught mid-destruction is replaced by a
    /// fresh one.
    pub fn bind(
        &self,
        owner: &OwnerId,
        broadcaster: &Arc<BadgeBroadcaster>,
        listener: Arc<dyn BadgeListener>,
    ) -> Arc<LifecycleBinding> {
        let key = (owner.clone(), broadcaster.id().clone());
        match self.bindings.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get().replace_listener(Arc::clone(&listener)) {
                    return Arc::clone(entry.get());
                }
                debug!(
                    owner = %owner,
                    broadcaster = %broadcaster.id(),
                    "replacing destroyed lifecycle binding"
                );
                let binding = self.new_binding(owner, broadcaster, listener);
                let _ = entry.insert(Arc::clone(&binding));
                binding
            }
            Entry::Vacant(entry) => {
                let binding = self.new_binding(owner, broadcaster, listener);
                debug!(owner = %owner, broadcaster = %broadcaster.id(), "lifecycle binding created");
                Arc::clone(entry.insert(binding).value())
            }
        }
    }

    fn new_binding(
        &self,
        owner: &OwnerId,
        broadcaster: &Arc<BadgeBroadcaster>,
        listener: Arc<dyn BadgeListener>,
    ) -> Arc<LifecycleBinding> {
        Arc::new(LifecycleBinding {
            owner: owner.clone(),
            broadcaster: Arc::clone(broadcaster),
            state: Mutex::new(BindingState {
                lifecycle: LifecycleState::Initialized,
                listener,
                registered: None,
            }),
            bindings: Arc::downgrade(&self.bindings),
        })
    }

    /// Destroy the binding for a pair, if any.
    pub fn unbind(&self, owner: &OwnerId, broadcaster: &BroadcasterId) -> bool {
        let binding = self
            .bindings
            .get(&(owner.clone(), broadcaster.clone()))
            .map(|entry| Arc::clone(entry.value()));
        match binding {
            Some(binding) => {
                binding.on_state(LifecycleState::Destroyed);
                true
            }
            None => false,
        }
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}

impl Default for LifecycleBinder {
    fn default() -> Self {
        Self::new()
    }
}
