//! Migration lock.
//!
//! Wraps the driver's non-blocking advisory lock with a bounded wait. The
//! lock is scoped to the target database, so separate processes migrating the
//! same database serialize on it.

use crate::database::{Database, DatabaseError};
use crate::utils::LOCK_POLL_INTERVAL;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error types for lock operations.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Timed out after {waited:?} waiting for the migration lock; another migration is in progress")]
    Timeout { waited: Duration },

    #[error("Database error while handling the migration lock: {0}")]
    Database(#[from] DatabaseError),
}

/// Acquires the advisory lock of one database.
#[derive(Clone)]
pub struct LockManager {
    db: Arc<dyn Database>,
    poll_interval: Duration,
}

impl LockManager {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            poll_interval: LOCK_POLL_INTERVAL,
        }
    }

    /// Override how often a blocked acquisition retries.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Wait up to `timeout` for the lock.
    pub async fn acquire(&self, timeout: Duration) -> Result<LockGuard, LockError> {
        let started = Instant::now();

        loop {
            if self.db.try_lock().await? {
                info!(waited = ?started.elapsed(), "Acquired migration lock");
                return Ok(LockGuard {
                    db: Arc::clone(&self.db),
                    released: false,
                });
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(LockError::Timeout { waited: timeout });
            }

            debug!("Migration lock is held elsewhere, retrying");
            tokio::time::sleep(self.poll_interval.min(timeout - elapsed)).await;
        }
    }
}

/// Exclusive ownership of the migration critical section.
pub struct LockGuard {
    db: Arc<dyn Database>,
    released: bool,
}

impl LockGuard {
    /// Release the lock. Calling this more than once is a no-op.
    pub async fn release(&mut self) -> Result<(), LockError> {
        if self.released {
            return Ok(());
        }
        self.db.unlock().await?;
        self.released = true;
        info!("Released migration lock");
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            warn!("Migration lock guard dropped without release; the database frees it when the session ends");
        }
    }
}
