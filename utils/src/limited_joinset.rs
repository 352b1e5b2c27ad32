use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinError, JoinSet};

/// A JoinSet whose tasks may all be spawned up front, but at most `max_concurrent`
/// of them run their body at the same time.
pub struct LimitedJoinSet<T> {
    inner: JoinSet<T>,
    semaphore: Arc<Semaphore>,
}

impl<T: Send + 'static> LimitedJoinSet<T> {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: JoinSet::new(),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn spawn<F>(&mut self, task: F) -> AbortHandle
    where
        F: Future<Output = T> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        self.inner.spawn(async move {
            // The semaphore is never closed, so acquire only fails if it were.
            let _permit = semaphore.acquire_owned().await.ok();
            task.await
        })
    }

    pub fn try_join_next(&mut self) -> Option<Result<T, JoinError>> {
        self.inner.try_join_next()
    }

    pub async fn join_next(&mut self) -> Option<Result<T, JoinError>> {
        self.inner.join_next().await
    }

    /// Aborts every task; queued tasks that never acquired a permit are dropped too.
    pub fn abort_all(&mut self) {
        self.inner.abort_all();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
