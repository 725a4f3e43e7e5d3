//! Bounded access to browser instances.
//!
//! Every scrape gets its own freshly launched instance; the pool only
//! limits how many exist at once. A slot is held by a [`BrowserLease`] and
//! returns to the pool when the lease is dropped, whatever the exit path.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::AppError;
use crate::traits::{BrowserLauncher, PageSession};

/// Sizing of the browser pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_browsers: usize,
    pub pages_per_browser: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_browsers: 5,
            pages_per_browser: 3,
        }
    }
}

impl PoolConfig {
    pub fn new(max_browsers: usize, pages_per_browser: usize) -> Self {
        Self {
            max_browsers,
            pages_per_browser,
        }
    }

    /// Total simultaneous slots (at least one).
    pub fn capacity(&self) -> usize {
        (self.max_browsers * self.pages_per_browser).max(1)
    }
}

/// Counting-semaphore pool over a [`BrowserLauncher`].
#[derive(Clone)]
pub struct BrowserPool<L: BrowserLauncher> {
    launcher: L,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl<L: BrowserLauncher> BrowserPool<L> {
    pub fn new(launcher: L, config: &PoolConfig) -> Self {
        let capacity = config.capacity();
        Self {
            launcher,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Wait for a free slot, then launch an isolated browser with one page.
    ///
    /// If the launch fails the slot is released before returning.
    pub async fn acquire(&self) -> Result<BrowserLease<L::Session>, AppError> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::BrowserError("Browser pool is closed".into()))?;

        tracing::trace!(in_use = self.in_use(), capacity = self.capacity, "Slot acquired");

        let session = self.launcher.launch().await?;

        Ok(BrowserLease {
            session,
            _permit: permit,
        })
    }

    /// Stop handing out new leases. Pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.slots.close();
    }
}

/// A pool slot plus the browser session launched for it.
///
/// Call [`BrowserLease::release`] to close the browser gracefully. Dropping
/// the lease without releasing (e.g. when the owning future is cancelled)
/// still frees the slot and drops the session.
pub struct BrowserLease<S: PageSession> {
    session: S,
    _permit: OwnedSemaphorePermit,
}

impl<S: PageSession> BrowserLease<S> {
    pub fn page(&mut self) -> &mut S {
        &mut self.session
    }

    /// Close the browser and give the slot back.
    pub async fn release(self) {
        let BrowserLease { session, _permit } = self;
        session.close().await;
    }
}
