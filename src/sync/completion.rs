//! # Single-fire completion signal.
//!
//! [`Completion`] is the synchronization primitive every layer of the runtime uses to
//! report termination upward: a producer sends **once** (optionally carrying a value),
//! and any number of waiters unblock with a clone of that value.
//!
//! ## Rules
//! - The first [`Completion::send`] wins; later sends are ignored and return `false`.
//! - Waiters that start after the value was sent return immediately.
//! - Clones share the same slot; replacing a signal means constructing a new one.
//!
//! ```text
//! producer ── send(v) ──► watch slot: Some(v) ──► waiter 1 (v.clone())
//!                                              └─► waiter N (v.clone())
//! ```

use std::sync::Arc;

use tokio::sync::watch;

/// Single-fire signal carrying a value of type `T`.
#[derive(Debug)]
pub struct Completion<T> {
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Clone> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Completion<T> {
    /// Creates an unsignaled completion.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Signals the completion with `value`.
    ///
    /// Returns `false` (and drops `value`) if it was already signaled.
    pub fn send(&self, value: T) -> bool {
        let mut value = Some(value);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = value.take();
            true
        })
    }

    /// Returns `true` once a value has been sent.
    pub fn is_ready(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Returns a clone of the sent value, if any, without waiting.
    pub fn peek(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Waits until the completion is signaled and returns a clone of its value.
    pub async fn wait(&self) -> T {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(v) = rx.borrow_and_update().clone() {
                return v;
            }
            // `self` keeps the sender alive, so `changed` only fails if it is dropped mid-wait.
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    /// Returns `true` if both handles point at the same signal.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }
}
