//! One-shot change notification, paired with a specific snapshot.
//!
//! Mirrors the intent of .NET's `IChangeToken`: a signal starts unfired,
//! transitions to fired exactly once, and is never reused for a second
//! generation. Built on `tokio::sync::Notify` the same way the teacher
//! gateway uses `Notify` for its discovery wake-up signal
//! (`server/state.rs::InfraState::discovery_wake`), plus an atomic flag so
//! `has_changed()` can be polled without awaiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct ChangeToken {
    inner: Arc<Inner>,
}

struct Inner {
    fired: AtomicBool,
    notify: Notify,
}

impl ChangeToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                fired: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn has_changed(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Fires the token. Idempotent: firing an already-fired token is a
    /// no-op, preserving the "exactly once" guarantee even if called twice.
    pub fn fire(&self) {
        if !self.inner.fired.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Waits until the token fires. Returns immediately if already fired.
    pub async fn changed(&self) {
        if self.has_changed() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.has_changed() {
                return;
            }
            notified.await;
            if self.has_changed() {
                return;
            }
        }
    }
}

impl Default for ChangeToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_unfired() {
        let token = ChangeToken::new();
        assert!(!token.has_changed());
    }

    #[tokio::test]
    async fn fires_exactly_once() {
        let token = ChangeToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.changed().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.fire();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait timed out")
            .unwrap();
        assert!(token.has_changed());
        // Firing again is a harmless no-op.
        token.fire();
        assert!(token.has_changed());
    }

    #[tokio::test]
    async fn each_snapshot_gets_a_fresh_token() {
        let c1 = ChangeToken::new();
        c1.fire();
        let c2 = ChangeToken::new();
        assert!(c1.has_changed());
        assert!(!c2.has_changed());
    }
}
