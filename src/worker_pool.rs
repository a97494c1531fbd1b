//! A fixed-capacity pool of concurrent study workers.
//!
//! Submission never blocks the caller past acquiring a permit: jobs beyond
//! `max_concurrent` queue on the semaphore itself rather than on an explicit
//! channel, since the drain cadence (§4.5) bounds realistic backlog.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Bounds how many study-processing jobs run concurrently.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(max_concurrent: std::num::NonZeroUsize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.get())),
        }
    }

    /// Spawn `job` once a permit is available, returning immediately with a
    /// handle to the spawned task. The permit is held for the job's
    /// lifetime and released on completion or panic.
    pub fn spawn<F>(&self, job: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("worker pool semaphore is never closed");
            job.await
        })
    }

    /// Wait for every permit to be released, i.e. all spawned jobs (in
    /// flight or yet to acquire a permit) to finish.
    pub async fn drain(&self, capacity: std::num::NonZeroUsize) {
        let _all_permits = self
            .semaphore
            .acquire_many(capacity.get() as u32)
            .await
            .expect("worker pool semaphore is never closed");
    }
}
