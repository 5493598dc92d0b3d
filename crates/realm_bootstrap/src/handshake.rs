//! One-shot startup handshake.
//!
//! [`handshake`] returns a [`Notifier`] / [`Waiter`] pair. The notifier fires
//! at most once; later signals are ignored and report `false`. The stored slot
//! is authoritative, so a waiter that arrives after the signal returns
//! immediately instead of waiting for a notification it already missed.
//!
//! Dropping the notifier without signaling marks the handshake abandoned,
//! which wakes the waiter with [`HandshakeError::Abandoned`]. A task that
//! panics or is rejected by its worker therefore never leaves the main thread
//! blocked forever.

use crate::error::HandshakeError;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

enum Slot<T> {
    Pending,
    Signaled(T),
    Abandoned,
    Taken,
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// Creates a connected notifier/waiter pair.
pub fn handshake<T>() -> (Notifier<T>, Waiter<T>) {
    let inner = Arc::new(Inner {
        slot: Mutex::new(Slot::Pending),
        ready: Condvar::new(),
    });
    (
        Notifier {
            inner: inner.clone(),
        },
        Waiter { inner },
    )
}

/// Sending half of the handshake, owned by the initialization task.
pub struct Notifier<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Notifier<T> {
    /// Fires the handshake with `value`.
    ///
    /// Returns `true` if this call fired it, `false` if it had already fired.
    pub fn signal(&self, value: T) -> bool {
        let mut slot = self.inner.slot.lock();
        if !matches!(*slot, Slot::Pending) {
            return false;
        }
        *slot = Slot::Signaled(value);
        self.inner.ready.notify_all();
        true
    }

    pub fn is_signaled(&self) -> bool {
        !matches!(*self.inner.slot.lock(), Slot::Pending)
    }
}

impl<T> Drop for Notifier<T> {
    fn drop(&mut self) {
        let mut slot = self.inner.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Abandoned;
            self.inner.ready.notify_all();
        }
    }
}

/// Receiving half of the handshake, owned by the main thread.
pub struct Waiter<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Waiter<T> {
    /// Whether the notifier has fired (or was dropped) yet.
    pub fn is_signaled(&self) -> bool {
        !matches!(*self.inner.slot.lock(), Slot::Pending)
    }

    /// Blocks up to `timeout` for the handshake to fire, without consuming it.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.slot.lock();
        while matches!(*slot, Slot::Pending) {
            if self.inner.ready.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        !matches!(*slot, Slot::Pending)
    }

    /// Blocks until the handshake fires and takes the signaled value.
    pub fn wait(self) -> Result<T, HandshakeError> {
        let mut slot = self.inner.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.inner.ready.wait(&mut slot);
        }
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Signaled(value) => Ok(value),
            Slot::Pending | Slot::Abandoned | Slot::Taken => Err(HandshakeError::Abandoned),
        }
    }
}
