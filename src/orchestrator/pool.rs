//! Per-provider worker pool.
//!
//! A thin wrapper over [`tokio::sync::Semaphore`]. Permits are FIFO-fair, so
//! a pool of size 1 starts work in the order it was requested.

use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

use crate::config::MAX_CONNECTIONS_LIMIT;

/// Bounded (or unbounded) worker pool for one provider.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Option<Arc<Semaphore>>,
    size: Option<usize>,
}

/// Slot in a [`WorkerPool`]; released on drop.
#[derive(Debug)]
pub struct PoolPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl WorkerPool {
    /// Sizes the pool from the download settings.
    ///
    /// With `concurrency` off the pool has one slot. Otherwise a
    /// non-positive `max_connections` means unlimited, and larger values
    /// are capped at [`MAX_CONNECTIONS_LIMIT`].
    #[must_use]
    pub fn new(concurrency: bool, max_connections: i64) -> Self {
        let size = if !concurrency {
            Some(1)
        } else if max_connections <= 0 {
            None
        } else {
            Some(usize::try_from(max_connections.min(MAX_CONNECTIONS_LIMIT)).unwrap_or(1))
        };
        Self {
            semaphore: size.map(|n| Arc::new(Semaphore::new(n))),
            size,
        }
    }

    /// Pool with no bound at all.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            semaphore: None,
            size: None,
        }
    }

    /// Number of slots, or `None` when unlimited.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        self.size
    }

    /// Waits for a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError`] once the pool has been closed.
    pub async fn acquire(&self) -> Result<PoolPermit, AcquireError> {
        let permit = match &self.semaphore {
            Some(semaphore) => Some(Arc::clone(semaphore).acquire_owned().await?),
            None => None,
        };
        Ok(PoolPermit { _permit: permit })
    }

    /// Fails every pending and future [`acquire`](Self::acquire).
    pub fn close(&self) {
        if let Some(semaphore) = &self.semaphore {
            semaphore.close();
        }
    }

    /// Slots currently free, or `None` when unlimited.
    #[must_use]
    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }
}
