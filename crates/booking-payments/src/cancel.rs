//! Cooperative Cancellation
//!
//! A [`CancellationToken`] is a shared one-way flag consulted by every async
//! branch of a payment session before it may mutate state. Tripping is
//! idempotent and irreversible; correctness never depends on an in-flight
//! remote call actually aborting, only on its local continuation observing
//! the flag and dropping its result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug)]
struct Inner {
    tripped: AtomicBool,
    notify: Notify,
}

/// One-way settable cancellation flag with an awaitable signal
#[derive(Clone, Debug)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tripped: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Trip the token. Idempotent; wakes every waiter, current and future.
    pub fn trip(&self) {
        self.inner.tripped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_tripped(&self) -> bool {
        self.inner.tripped.load(Ordering::SeqCst)
    }

    /// Resolves once the token is tripped; resolves immediately if it already is.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before re-checking the flag, so a trip
            // between the check and the await cannot be missed.
            notified.as_mut().enable();
            if self.is_tripped() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn trip_is_one_way_and_idempotent() {
        let token = CancellationToken::new();
        assert!(!token.is_tripped());
        token.trip();
        token.trip();
        assert!(token.is_tripped());
    }

    #[tokio::test]
    async fn cancelled_resolves_for_waiters_and_late_comers() {
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.trip();
        waiter.await.unwrap();

        // Already tripped: resolves immediately
        token.cancelled().await;
    }
}
