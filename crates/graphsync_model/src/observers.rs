//! Observer lists for change notification.
//!
//! An [`Observers`] list distributes events to every subscribed callback, in
//! subscription order. Subscribing returns a [`Subscription`] guard; dropping
//! the guard removes the callback again.
//!
//! Callbacks are invoked without any lock held, so a callback may subscribe,
//! unsubscribe or trigger further events on the same list.
//!
//! # Usage
//!
//! ```rust
//! use graphsync_model::Observers;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let observers = Observers::<u32>::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//!
//! let counter = seen.clone();
//! let subscription = observers.subscribe(move |n| {
//!     counter.fetch_add(*n as usize, Ordering::SeqCst);
//! });
//!
//! observers.notify(&2);
//! drop(subscription);
//! observers.notify(&5);
//! assert_eq!(seen.load(Ordering::SeqCst), 2);
//! ```

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct ObserverList<E> {
    next_id: AtomicU64,
    callbacks: RwLock<Vec<(u64, Callback<E>)>>,
}

/// A thread-safe list of event callbacks.
pub struct Observers<E> {
    inner: Arc<ObserverList<E>>,
}

impl<E: 'static> Observers<E> {
    /// Creates an empty observer list.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ObserverList {
                next_id: AtomicU64::new(0),
                callbacks: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Subscribes a callback.
    ///
    /// The callback stays registered until the returned guard is dropped or
    /// cancelled.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.callbacks.write().push((id, Arc::new(callback)));

        let list: Weak<ObserverList<E>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(list) = list.upgrade() {
                list.callbacks.write().retain(|(other, _)| *other != id);
            }
        })
    }

    /// Delivers an event to every subscribed callback.
    pub fn notify(&self, event: &E) {
        // Snapshot so callbacks can re-enter the list.
        let callbacks: Vec<Callback<E>> = self
            .inner
            .callbacks
            .read()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }

    /// Returns the number of subscribed callbacks.
    pub fn len(&self) -> usize {
        self.inner.callbacks.read().len()
    }

    /// Returns true if nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every callback.
    pub fn clear(&self) {
        self.inner.callbacks.write().clear();
    }
}

impl<E: 'static> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Observers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.inner.callbacks.read().len())
            .finish()
    }
}

/// Guard keeping a callback subscribed.
///
/// Dropping the guard unsubscribes the callback.
#[must_use = "dropping a subscription unsubscribes it immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Creates a subscription that runs `cancel` when dropped.
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Unsubscribes now.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    /// Keeps the callback subscribed for as long as the observed object lives.
    pub fn detach(mut self) {
        self.cancel = None;
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
