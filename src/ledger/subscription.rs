use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// What kind of write produced a change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Appended,
    Updated,
    Removed,
    MarkedPaid,
    OverdueRefreshed,
    SyncStateChanged,
}

/// Sent to subscribers after a ledger write is durable.
///
/// Only a hint: read the current state with `LedgerStore::snapshot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerChange {
    pub version: u64,
    /// `None` when the write touched several students
    pub student_id: Option<String>,
    pub kind: ChangeKind,
}

type Listener = Arc<dyn Fn(&LedgerChange) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

impl Registry {
    fn listeners(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Listener)>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: u64) {
        self.listeners().retain(|(listener_id, _)| *listener_id != id);
    }
}

#[derive(Clone, Default)]
pub struct Subscribers {
    registry: Arc<Registry>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&LedgerChange) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.listeners().push((id, Arc::new(listener)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Call every current listener. The registry lock is released first, so
    /// listeners may subscribe or unsubscribe while being notified.
    pub fn notify(&self, change: &LedgerChange) {
        let listeners: Vec<Listener> = self
            .registry
            .listeners()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(change);
        }
    }

    pub fn len(&self) -> usize {
        self.registry.listeners().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps a listener registered until unsubscribed or dropped
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}
