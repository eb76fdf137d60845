//! Fixed-capacity worker pool.
//!
//! Every job runs as its own tokio task, so a panic or hang in one job cannot
//! touch another job's state. A semaphore caps how many jobs run at once; all
//! jobs may be submitted up front. Completions are handed back in completion
//! order, tagged with the key they were submitted under.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};

/// How a job left the pool.
#[derive(Debug)]
pub enum JobOutcome<T> {
    Finished(T),
    Panicked(String),
}

pub struct WorkerPool<K, T> {
    permits: Arc<Semaphore>,
    tasks: JoinSet<T>,
    keys: HashMap<Id, K>,
}

impl<K, T> WorkerPool<K, T>
where
    T: Send + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity.max(1))),
            tasks: JoinSet::new(),
            keys: HashMap::new(),
        }
    }

    /// Queues a job. Does not block; the job starts once a slot frees up.
    pub fn submit<F>(&mut self, key: K, job: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let handle = self.tasks.spawn(async move {
            // The semaphore is never closed, so acquire only fails if the
            // pool itself is gone, in which case the task is aborted anyway.
            let _permit = permits.acquire_owned().await;
            job.await
        });
        self.keys.insert(handle.id(), key);
    }

    /// Waits for the next job to finish. `None` once the pool is drained.
    pub async fn next_completed(&mut self) -> Option<(K, JobOutcome<T>)> {
        loop {
            let joined = self.tasks.join_next_with_id().await?;
            let (id, outcome) = match joined {
                Ok((id, value)) => (id, JobOutcome::Finished(value)),
                Err(err) => {
                    let id = err.id();
                    let reason = if err.is_panic() {
                        panic_message(err.into_panic())
                    } else {
                        "task cancelled".to_string()
                    };
                    (id, JobOutcome::Panicked(reason))
                }
            };
            if let Some(key) = self.keys.remove(&id) {
                return Some((key, outcome));
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Pool size: the backend's safe ceiling, never more than the machine's
/// parallelism, never less than one.
pub fn size_pool(backend_ceiling: usize, available_parallelism: usize) -> usize {
    backend_ceiling.min(available_parallelism).max(1)
}

pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
