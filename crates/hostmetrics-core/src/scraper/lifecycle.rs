//! Lifecycle state machine wrapped around every scraper.
//!
//! ```text
//! Uninitialized ──start ok──► Started ──scrape*──► Started
//!       │   └──start err──► Failed                    │
//!       └──────────────shutdown──────────► Shutdown ◄──┘
//! ```
//!
//! Shutdown runs the inner scraper's shutdown at most once, and only if it
//! was started.

use tracing::{debug, warn};

use super::{ScrapeContext, ScrapeError, ScrapeOutput, Scraper};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Started,
    Failed,
    Shutdown,
}

/// A scraper plus its key and lifecycle state.
pub struct ManagedScraper {
    key: String,
    state: LifecycleState,
    inner: Box<dyn Scraper>,
}

impl ManagedScraper {
    pub fn new(key: impl Into<String>, inner: Box<dyn Scraper>) -> Self {
        Self {
            key: key.into(),
            state: LifecycleState::Uninitialized,
            inner,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn start(&mut self, ctx: &ScrapeContext) -> Result<(), ScrapeError> {
        if self.state != LifecycleState::Uninitialized {
            return Err(ScrapeError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        match self.inner.start(ctx) {
            Ok(()) => {
                debug!(scraper = %self.key, "scraper started");
                self.state = LifecycleState::Started;
                Ok(())
            }
            Err(e) => {
                self.state = LifecycleState::Failed;
                Err(e)
            }
        }
    }

    pub fn scrape(&mut self, ctx: &ScrapeContext) -> Result<ScrapeOutput, ScrapeError> {
        if self.state != LifecycleState::Started {
            return Err(ScrapeError::InvalidState {
                operation: "scrape",
                state: self.state,
            });
        }
        ctx.check()?;
        self.inner.scrape(ctx)
    }

    /// Releases the scraper. Errors are logged and returned; later calls
    /// are no-ops.
    pub fn shutdown(&mut self, ctx: &ScrapeContext) -> Result<(), ScrapeError> {
        let previous = std::mem::replace(&mut self.state, LifecycleState::Shutdown);
        if previous != LifecycleState::Started {
            return Ok(());
        }
        let result = self.inner.shutdown(ctx);
        match &result {
            Ok(()) => debug!(scraper = %self.key, "scraper shut down"),
            Err(e) => warn!(scraper = %self.key, error = %e, "scraper shutdown failed"),
        }
        result
    }
}

impl std::fmt::Debug for ManagedScraper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedScraper")
            .field("key", &self.key)
            .field("state", &self.state)
            .finish()
    }
}
