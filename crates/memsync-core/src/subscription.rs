//! Subscriber registry and change notifications

use crate::document::DocumentId;
use crate::store::StoreState;
use crate::token::EditToken;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Why the visible state of a document changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCause {
    /// A local edit was recorded
    Edited,
    /// The source reported a new version that is now visible
    Updated,
    /// A pending edit gained a conflict, or its conflict snapshot was replaced
    ConflictChanged,
    /// A standing conflict was resolved by an update or an acknowledgement
    ConflictCleared,
}

/// Notification payload delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub id: DocumentId,
    pub cause: ChangeCause,
    /// Edit timeline position right after the change was applied
    pub token: EditToken,
}

pub(crate) type Callback = Arc<dyn Fn(&Change) + Send + Sync>;

/// Registered callbacks, kept in registration order
#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

impl Subscribers {
    pub(crate) fn add(&mut self, callback: Callback) -> u64 {
        self.next_id += 1;
        self.entries.push((self.next_id, callback));
        self.next_id
    }

    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Callback> {
        self.entries.iter().map(|(_, cb)| cb.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Deliver a change to every callback, in order
pub(crate) fn dispatch(callbacks: &[Callback], change: &Change) {
    trace!(id = %change.id, cause = ?change.cause, subscribers = callbacks.len(), "Notifying subscribers");
    for callback in callbacks {
        callback(change);
    }
}

/// Handle returned by [`ReconciliationStore::subscribe`].
///
/// Dropping the handle leaves the subscriber registered; call
/// [`Subscription::unsubscribe`] to remove it.
///
/// [`ReconciliationStore::subscribe`]: crate::ReconciliationStore::subscribe
pub struct Subscription {
    id: u64,
    state: Weak<Mutex<StoreState>>,
}

impl Subscription {
    pub(crate) fn new(id: u64, state: Weak<Mutex<StoreState>>) -> Self {
        Self { id, state }
    }

    /// Remove the subscriber. Calling this again is a no-op.
    ///
    /// Takes effect from the next change on. A change whose dispatch is
    /// already under way was sent to a copy of the subscriber list, so a
    /// callback removed from inside another callback still receives it.
    pub fn unsubscribe(&self) {
        if let Some(state) = self.state.upgrade() {
            if state.lock().subscribers.remove(self.id) {
                trace!(subscriber = self.id, "Subscriber removed");
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
