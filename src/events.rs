//! Change notifications.
//!
//! Every handler owns an [`EventHub`]. The [`PermissionManager`](crate::PermissionManager)
//! forwards the active handlers' events into its own hub, so subscribers
//! attached to the manager keep receiving events across handler swaps.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;

use crate::{PermissionBranch, PermissionGroup, UserId};

/// A change a subscriber can apply incrementally without re-querying.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionEvent {
    GroupRegistered(Arc<PermissionGroup>),
    /// Fired before the group is removed from the catalog.
    GroupDeregistered(Arc<PermissionGroup>),
    GroupUpdated(Arc<PermissionGroup>),
    UserPermissionUpdated {
        user: UserId,
        branch: PermissionBranch,
        added: bool,
    },
    UserGroupUpdated {
        user: UserId,
        group: String,
        added: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&PermissionEvent) + Send + Sync>;

/// Registered callback list.
#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Callback)>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&PermissionEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Calls every subscriber. Callbacks run outside the lock and may subscribe or unsubscribe.
    pub fn emit(&self, event: &PermissionEvent) {
        let subscribers: Vec<Callback> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in subscribers {
            callback(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
