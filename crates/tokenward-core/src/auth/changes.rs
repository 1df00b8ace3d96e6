//! "Session changed" broadcast.
//!
//! Observers get no payload. They re-read the manager when called, so they
//! always see the latest committed state instead of a snapshot taken at emit
//! time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Observers {
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

fn lock(observers: &Mutex<Observers>) -> MutexGuard<'_, Observers> {
    observers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Observer list for session changes.
#[derive(Clone, Default)]
pub struct ChangeChannel {
    observers: Arc<Mutex<Observers>>,
}

impl ChangeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`; it stays registered until the returned
    /// `Subscription` is dropped or unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut observers = lock(&self.observers);
        let id = observers.next_id;
        observers.next_id += 1;
        observers.callbacks.push((id, Arc::new(callback)));
        Subscription {
            id,
            observers: Arc::downgrade(&self.observers),
        }
    }

    /// Call every observer. Callbacks run outside the lock so they may
    /// subscribe, unsubscribe or query the session themselves.
    pub fn publish(&self) {
        let callbacks: Vec<Callback> = lock(&self.observers)
            .callbacks
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.observers).callbacks.len()
    }
}

/// Disposer returned by [`ChangeChannel::subscribe`].
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    observers: Weak<Mutex<Observers>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(observers) = self.observers.upgrade() else {
            return;
        };
        // The callback may own other subscriptions; release it after the lock.
        let removed = {
            let mut guard = lock(&observers);
            guard
                .callbacks
                .iter()
                .position(|(id, _)| *id == self.id)
                .map(|index| guard.callbacks.remove(index))
        };
        drop(removed);
    }
}
