//! Bounded pool of outbound RPC connections
//!
//! A fixed number of identical transport handles is created up front. Each
//! call borrows one handle through a guard that puts it back when dropped, so
//! a failed or cancelled call never shrinks the pool.

use crate::transport::RpcTransport;
use samp_core::{CoreError, Result, Value};
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

/// Thread-safe pool of `capacity` transport handles
pub struct ConnectionPool<T> {
    handles: Mutex<Vec<T>>,
    /// One permit per idle handle; capacity bounds concurrent calls
    permits: Semaphore,
    capacity: usize,
    acquire_timeout: Option<Duration>,
}

impl<T> ConnectionPool<T> {
    /// Create a pool pre-populated with `capacity` handles from `factory`
    pub fn new<F>(capacity: usize, mut factory: F) -> Result<Self>
    where
        F: FnMut() -> T,
    {
        if capacity == 0 {
            return Err(CoreError::InvalidConfiguration(
                "connection pool capacity must be at least 1".to_string(),
            ));
        }

        let handles = (0..capacity).map(|_| factory()).collect();
        debug!("Connection pool created with {} handles", capacity);

        Ok(Self {
            handles: Mutex::new(handles),
            permits: Semaphore::new(capacity),
            capacity,
            acquire_timeout: None,
        })
    }

    /// Bound how long `acquire` waits for a free handle
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of handles currently idle in the pool
    pub fn available(&self) -> usize {
        self.lock_handles().len()
    }

    /// Borrow a handle, waiting up to the configured acquire timeout
    pub async fn acquire(&self) -> Result<PooledConnection<'_, T>> {
        self.acquire_within(self.acquire_timeout).await
    }

    /// Borrow a handle, waiting at most `timeout` (forever when `None`)
    pub async fn acquire_within(&self, timeout: Option<Duration>) -> Result<PooledConnection<'_, T>> {
        let permit = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.permits.acquire())
                .await
                .map_err(|_| {
                    CoreError::Timeout(format!(
                        "no pooled connection available within {:?}",
                        limit
                    ))
                })?,
            None => self.permits.acquire().await,
        }
        .map_err(|_| CoreError::Internal("connection pool closed".to_string()))?;

        let handle = self.lock_handles().pop().ok_or_else(|| {
            CoreError::Internal("pool permit granted without an idle handle".to_string())
        })?;

        Ok(PooledConnection {
            pool: self,
            handle: Some(handle),
            _permit: permit,
        })
    }

    fn lock_handles(&self) -> MutexGuard<'_, Vec<T>> {
        // The critical sections never panic while holding the lock, but a
        // poisoned pool must still hand its handles back
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: RpcTransport> ConnectionPool<T> {
    /// Invoke `method` on a borrowed handle; the handle is returned on every exit path
    pub async fn invoke(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let mut connection = self.acquire().await?;
        debug!(
            "Invoking {} ({} of {} handles idle)",
            method,
            self.available(),
            self.capacity
        );
        connection.invoke(method, params).await
    }
}

/// A handle checked out of a `ConnectionPool`
pub struct PooledConnection<'a, T> {
    pool: &'a ConnectionPool<T>,
    handle: Option<T>,
    // Dropped after `drop` has returned the handle
    _permit: SemaphorePermit<'a>,
}

impl<T> Deref for PooledConnection<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.handle
            .as_ref()
            .expect("pooled handle is present until drop")
    }
}

impl<T> DerefMut for PooledConnection<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.handle
            .as_mut()
            .expect("pooled handle is present until drop")
    }
}

impl<T> Drop for PooledConnection<'_, T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.lock_handles().push(handle);
        }
    }
}
