//! Cancellation and deadlines passed to scraper operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use super::ScrapeError;

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation flag shared by a receiver and its scrapers.
///
/// Blocking code polls [`CancelToken::is_cancelled`]; async loops await
/// [`CancelToken::cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Completes once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Context handed to `start`, `scrape` and `shutdown`.
#[derive(Debug, Clone, Default)]
pub struct ScrapeContext {
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl ScrapeContext {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Fails once the receiver is stopping or the deadline has passed.
    /// Scrapers call this between reads.
    pub fn check(&self) -> Result<(), ScrapeError> {
        if self.cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ScrapeError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_context_passes() {
        assert!(ScrapeContext::background().check().is_ok());
    }

    #[test]
    fn test_cancel_is_seen_by_clones() {
        let token = CancelToken::new();
        let ctx = ScrapeContext::new(token.clone());
        token.cancel();
        assert!(ctx.cancel_token().is_cancelled());
        assert!(matches!(ctx.check(), Err(ScrapeError::Cancelled)));
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = ScrapeContext::background().with_deadline(Instant::now());
        assert!(matches!(ctx.check(), Err(ScrapeError::DeadlineExceeded)));
        let ctx = ScrapeContext::background().with_timeout(Duration::from_secs(60));
        assert!(ctx.check().is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::task::yield_now().await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_after_cancel_returns_immediately() {
        let token = CancelToken::new();
        token.cancel();
        token.cancelled().await;
    }
}
