//! Fixed-size worker pool
//!
//! The pool is the server's only admission control. It holds exactly
//! `capacity` workers created up front; once every worker is bound to a
//! connection, [`WorkerPool::acquire`] waits until one is released, which in
//! turn stalls the accept loop.

use std::ops::Deref;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::worker::Worker;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is closed")]
    Closed,
}

#[derive(Debug)]
struct PoolInner {
    idle: Mutex<Vec<Arc<Worker>>>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// A fixed set of workers handed out one connection at a time.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Eagerly builds `capacity` workers, calling `factory` with indexes
    /// `0..capacity`.
    pub fn new<F>(capacity: usize, mut factory: F) -> Self
    where
        F: FnMut(usize) -> Worker,
    {
        // Popped from the back, so reverse to hand out worker 0 first.
        let idle: Vec<Arc<Worker>> = (0..capacity).rev().map(|i| Arc::new(factory(i))).collect();

        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(idle),
                permits: Arc::new(Semaphore::new(capacity)),
                capacity,
            }),
        }
    }

    /// Waits for an idle worker and binds it to the caller.
    ///
    /// The worker goes back to the pool when the returned guard is dropped,
    /// whatever happened while it was in use.
    pub async fn acquire(&self) -> Result<PooledWorker, PoolError> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        // Holding a permit guarantees at least one idle worker.
        let worker = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .ok_or(PoolError::Closed)?;

        Ok(PooledWorker {
            worker,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of idle workers right now.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }
}

/// Exclusive access to one worker; releases it on drop.
#[derive(Debug)]
pub struct PooledWorker {
    worker: Arc<Worker>,
    pool: Arc<PoolInner>,
    // Dropped after `drop` has pushed the worker back.
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledWorker {
    type Target = Worker;

    fn deref(&self) -> &Worker {
        &self.worker
    }
}

impl Drop for PooledWorker {
    fn drop(&mut self) {
        self.pool
            .idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(self.worker.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(capacity: usize) -> WorkerPool {
        WorkerPool::new(capacity, |id| Worker::new(id, Vec::new()))
    }

    #[tokio::test]
    async fn hands_out_workers_in_index_order() {
        let pool = pool(3);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!((a.id(), b.id()), (0, 1));
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn drop_returns_worker() {
        let pool = pool(1);
        let w = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);
        drop(w);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.acquire().await.unwrap().id(), 0);
    }
}
