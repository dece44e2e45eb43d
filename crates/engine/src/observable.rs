//! Observable value cell.
//!
//! Every UI-facing output of the engine (active alert, visible toasts,
//! counts) and the active identity scope are published through an
//! `Observable`. The composition root owns the cell and hands clones to
//! whoever needs to read, write or watch it.

use tokio::sync::watch;

/// A `subscribe`/`get`/`set` value backed by a `tokio::sync::watch` channel.
///
/// Clones share the same underlying value.
#[derive(Debug, Clone)]
pub struct Observable<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone> Observable<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value and notify subscribers. Never fails, even with no
    /// subscribers.
    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Replace the value only if it differs, notifying subscribers only then.
    pub fn set_if_changed(&self, value: T)
    where
        T: PartialEq,
    {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone + Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
