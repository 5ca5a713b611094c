//! Ack-wait queue for `acks=-1` produces.
//!
//! A classic condition-variable problem expressed with an explicit queue of
//! `(offset, notifier)` pairs instead of a condvar — the router's wait
//! path is async, so `tokio::sync::Notify` composes with
//! `tokio::time::timeout` directly.

use std::sync::Arc;

use kestrel_common::types::Offset;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// A single pending `acks=-1` append waiting for HWM to reach `offset`.
pub struct Waiter {
    pub offset: Offset,
    notify: Notify,
}

/// Registry of waiters for one partition. Woken whenever HWM advances or
/// ISR shrinks; each waiter re-checks its own condition on wake.
#[derive(Default)]
pub struct AckWaiters {
    waiters: Mutex<Vec<Arc<Waiter>>>,
}

impl AckWaiters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, offset: Offset) -> Arc<Waiter> {
        let waiter = Arc::new(Waiter {
            offset,
            notify: Notify::new(),
        });
        self.waiters.lock().push(waiter.clone());
        waiter
    }

    /// Wake every waiter whose target offset is now satisfied by `hwm`.
    pub fn notify_hwm_advanced(&self, hwm: Offset) {
        for waiter in self.waiters.lock().iter() {
            if waiter.offset <= hwm {
                waiter.notify.notify_one();
            }
        }
    }

    /// Wake every waiter so it can re-check the ISR-shrink condition.
    pub fn notify_isr_changed(&self) {
        for waiter in self.waiters.lock().iter() {
            waiter.notify.notify_one();
        }
    }

    /// Remove a waiter once it's resolved (success, error, or timeout).
    pub fn remove(&self, target: &Arc<Waiter>) {
        self.waiters.lock().retain(|w| !Arc::ptr_eq(w, target));
    }
}

impl Waiter {
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wakes_waiters_at_or_below_hwm() {
        let waiters = AckWaiters::new();
        let w1 = waiters.register(5);
        let w2 = waiters.register(10);

        waiters.notify_hwm_advanced(7);

        // w1's target is satisfied, so notified() resolves immediately.
        w1.notified().await;
        waiters.remove(&w1);
        assert_eq!(waiters.waiters.lock().len(), 1);
        let _ = w2;
    }
}
