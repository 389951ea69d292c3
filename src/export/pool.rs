//! Bounded worker pool for part uploads
//!
//! At most `max_concurrency` units of work run at once. [`WorkerPool::submit`]
//! waits for a free slot and then spawns the work without waiting for it to
//! finish. Every unit races its work against the pool's cancellation token,
//! and [`WorkerPool::shutdown`] joins all of them, so cancelled work is always
//! observed before the pool is gone.
//!
//! The first unit that fails halts the pool: it parks its error in a shared
//! slot and cancels the pool token, so no further unit is admitted and the
//! others stop. Whoever next observes the halt receives that error instead of
//! `Cancelled`.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ExportError, Result};

/// Default number of concurrent uploads
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Admission-controlled pool of tokio tasks
pub struct WorkerPool<T> {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<Result<T>>,
    cancel: CancellationToken,
    failure: Arc<Mutex<Option<ExportError>>>,
    max_concurrency: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create a pool whose cancellation follows `parent`
    ///
    /// Cancelling `parent` cancels the pool; cancelling the pool leaves
    /// `parent` untouched.
    pub fn new(max_concurrency: usize, parent: &CancellationToken) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            tasks: JoinSet::new(),
            cancel: parent.child_token(),
            failure: Arc::new(Mutex::new(None)),
            max_concurrency,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Units submitted and not yet reaped
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token observed by every unit of work in this pool
    ///
    /// Fires when the parent is cancelled or when a unit fails.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Error explaining why the pool halted
    ///
    /// Hands out the first unit failure once; afterwards, or when the halt
    /// came from the parent token, this is `Cancelled`.
    pub fn halt_reason(&self) -> ExportError {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or(ExportError::Cancelled)
    }

    /// Admit one unit of work
    ///
    /// Suspends while `max_concurrency` units are running. Returns the
    /// [`halt_reason`](Self::halt_reason) if the pool halts before a slot
    /// frees up.
    pub async fn submit<F>(&mut self, work: F) -> Result<()>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(self.halt_reason()),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| self.halt_reason())?
            }
        };

        // A failing unit cancels before releasing its slot.
        if self.cancel.is_cancelled() {
            return Err(self.halt_reason());
        }

        let token = self.cancel.clone();
        let failure = self.failure.clone();
        self.tasks.spawn(async move {
            let _permit = permit;
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(ExportError::Cancelled),
                result = work => result,
            };

            match result {
                Err(e) if !e.is_cancelled() => {
                    let mut slot = failure.lock().unwrap_or_else(PoisonError::into_inner);
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                    drop(slot);
                    token.cancel();
                    Err(ExportError::Cancelled)
                }
                other => other,
            }
        });
        Ok(())
    }

    /// Reap one finished unit without waiting
    pub fn try_next(&mut self) -> Option<Result<T>> {
        let joined = self.tasks.try_join_next()?;
        Some(self.resolve(joined))
    }

    /// Wait for the next unit to finish, in completion order
    pub async fn next(&mut self) -> Option<Result<T>> {
        let joined = self.tasks.join_next().await?;
        Some(self.resolve(joined))
    }

    /// Wait for every submitted unit
    ///
    /// Stops at the first failure and returns it; units still running are
    /// left for [`WorkerPool::shutdown`].
    pub async fn drain(&mut self) -> Result<Vec<T>> {
        let mut results = Vec::with_capacity(self.tasks.len());
        while let Some(result) = self.next().await {
            results.push(result?);
        }
        Ok(results)
    }

    /// Swap a unit's `Cancelled` for the failure that halted the pool
    fn resolve(&self, joined: std::result::Result<Result<T>, JoinError>) -> Result<T> {
        match flatten(joined) {
            Err(ExportError::Cancelled) => Err(self.halt_reason()),
            other => other,
        }
    }

    /// Cancel all outstanding units and wait until each has observed it
    ///
    /// # Returns
    /// * `usize` - Number of units that ended cancelled
    pub async fn shutdown(&mut self) -> usize {
        self.cancel.cancel();
        self.semaphore.close();

        let mut cancelled = 0;
        while let Some(result) = self.tasks.join_next().await {
            if matches!(flatten(result), Err(ExportError::Cancelled)) {
                cancelled += 1;
            }
        }

        debug!("Worker pool shut down ({} units cancelled)", cancelled);
        cancelled
    }
}

fn flatten<T>(joined: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    joined.map_err(ExportError::from).and_then(|result| result)
}
