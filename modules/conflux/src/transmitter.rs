//! Ordered, synchronous fan-out of a value to subscribed listeners.
//!
//! Listeners run in subscription order. A listener may unsubscribe itself or
//! any other listener while a publish is running; the removal is deferred
//! until the outermost publish returns, and a listener marked for removal is
//! not called again in the meantime. Listeners added during a publish are
//! first called on the next one.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

pub type ListenerId = u64;

type ListenerFn<T> = Rc<dyn Fn(&T)>;

/// Anything a [`Subscription`] can be disposed against.
pub(crate) trait Unsubscribe {
    fn unsubscribe(&self, id: ListenerId) -> bool;
}

struct TransmitterInner<T> {
    listeners: RefCell<Vec<(ListenerId, ListenerFn<T>)>>,
    next_id: Cell<ListenerId>,
    /// Publish nesting depth.
    publishing: Cell<usize>,
    deferred: RefCell<Vec<ListenerId>>,
}

impl<T> Unsubscribe for TransmitterInner<T> {
    fn unsubscribe(&self, id: ListenerId) -> bool {
        let known = self.listeners.borrow().iter().any(|(lid, _)| *lid == id);
        if !known {
            return false;
        }
        if self.publishing.get() > 0 {
            let mut deferred = self.deferred.borrow_mut();
            if !deferred.contains(&id) {
                deferred.push(id);
            }
            return true;
        }
        let removed = {
            let mut listeners = self.listeners.borrow_mut();
            let index = listeners.iter().position(|(lid, _)| *lid == id);
            index.map(|index| listeners.remove(index))
        };
        removed.is_some()
    }
}

pub struct Transmitter<T> {
    inner: Rc<TransmitterInner<T>>,
}

impl<T> Clone for Transmitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Transmitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transmitter")
            .field("listeners", &self.inner.listeners.borrow().len())
            .field("publishing", &self.inner.publishing.get())
            .finish()
    }
}

impl<T: 'static> Default for Transmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Transmitter<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(TransmitterInner {
                listeners: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
                publishing: Cell::new(0),
                deferred: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner
            .listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));
        let source: Weak<dyn Unsubscribe> = Rc::downgrade(&self.inner) as Weak<dyn Unsubscribe>;
        Subscription { id, source }
    }

    /// Remove a listener. Returns false if `id` is not subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.unsubscribe(id)
    }

    pub fn publish(&self, value: &T) {
        let snapshot: Vec<(ListenerId, ListenerFn<T>)> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(id, listener)| (*id, Rc::clone(listener)))
            .collect();

        self.inner.publishing.set(self.inner.publishing.get() + 1);
        let _publishing = PublishGuard { inner: &self.inner };

        for (id, listener) in snapshot {
            if self.inner.deferred.borrow().contains(&id) {
                continue;
            }
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies deferred removals once the outermost publish unwinds.
struct PublishGuard<'a, T> {
    inner: &'a TransmitterInner<T>,
}

impl<T> Drop for PublishGuard<'_, T> {
    fn drop(&mut self) {
        let depth = self.inner.publishing.get().saturating_sub(1);
        self.inner.publishing.set(depth);
        if depth > 0 {
            return;
        }
        let ids = std::mem::take(&mut *self.inner.deferred.borrow_mut());
        if ids.is_empty() {
            return;
        }
        let removed: Vec<(ListenerId, ListenerFn<T>)> = {
            let mut listeners = self.inner.listeners.borrow_mut();
            let (removed, kept) = listeners
                .drain(..)
                .partition(|(id, _)| ids.contains(id));
            *listeners = kept;
            removed
        };
        drop(removed);
    }
}

/// Disposer for one listener.
pub struct Subscription {
    id: ListenerId,
    source: Weak<dyn Unsubscribe>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    pub(crate) fn new(id: ListenerId, source: Weak<dyn Unsubscribe>) -> Self {
        Self { id, source }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener. Returns false if it was already gone.
    pub fn dispose(&self) -> bool {
        self.source
            .upgrade()
            .is_some_and(|source| source.unsubscribe(self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_run_in_subscription_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let transmitter: Transmitter<u32> = Transmitter::new();
        for tag in ["first", "second", "third"] {
            let seen = Rc::clone(&seen);
            transmitter.subscribe(move |n| seen.borrow_mut().push(format!("{tag}:{n}")));
        }

        transmitter.publish(&7);

        assert_eq!(*seen.borrow(), vec!["first:7", "second:7", "third:7"]);
    }

    #[test]
    fn dispose_removes_listener() {
        let calls = Rc::new(Cell::new(0));
        let transmitter: Transmitter<()> = Transmitter::new();
        let counter = Rc::clone(&calls);
        let sub = transmitter.subscribe(move |_| counter.set(counter.get() + 1));

        transmitter.publish(&());
        assert!(sub.dispose());
        assert!(!sub.dispose());
        transmitter.publish(&());

        assert_eq!(calls.get(), 1);
        assert!(transmitter.is_empty());
    }

    #[test]
    fn removal_during_publish_is_deferred_and_skips_the_removed_listener() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let transmitter: Transmitter<()> = Transmitter::new();
        let victim: Rc<RefCell<Option<Subscription>>> = Rc::default();

        let log = Rc::clone(&seen);
        let target = Rc::clone(&victim);
        let handle = transmitter.clone();
        transmitter.subscribe(move |_| {
            log.borrow_mut().push("remover");
            if let Some(sub) = target.borrow_mut().take() {
                assert!(sub.dispose());
                // Still present until the publish finishes.
                assert_eq!(handle.len(), 2);
            }
        });
        let log = Rc::clone(&seen);
        *victim.borrow_mut() = Some(transmitter.subscribe(move |_| log.borrow_mut().push("victim")));

        transmitter.publish(&());
        assert_eq!(transmitter.len(), 1);
        transmitter.publish(&());

        assert_eq!(*seen.borrow(), vec!["remover", "remover"]);
    }

    #[test]
    fn listener_added_during_publish_waits_for_next_publish() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let transmitter: Transmitter<()> = Transmitter::new();

        let log = Rc::clone(&seen);
        let handle = transmitter.clone();
        let added = Cell::new(false);
        transmitter.subscribe(move |_| {
            log.borrow_mut().push("outer");
            if !added.replace(true) {
                let log = Rc::clone(&log);
                handle.subscribe(move |_| log.borrow_mut().push("late"));
            }
        });

        transmitter.publish(&());
        transmitter.publish(&());

        assert_eq!(*seen.borrow(), vec!["outer", "outer", "late"]);
    }
}
