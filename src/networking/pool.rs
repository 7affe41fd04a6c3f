use std::future::Future;
use std::sync::Arc;
use std::thread;

use tokio::sync::Semaphore;

/// Shared dispatcher for inbound request handling.
///
/// Admission is unbounded and FIFO; at most `max_workers` submissions run
/// at once. One pool is shared by every accepted connection, so a flood of
/// requests on one peer cannot starve the runtime.
#[derive(Clone)]
pub struct DispatchPool {
    permits: Arc<Semaphore>,
}

impl DispatchPool {
    /// Create a pool bounded to four workers per available core.
    pub fn new() -> DispatchPool {
        let cores = thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1);
        DispatchPool::with_workers(cores * 4)
    }

    pub fn with_workers(max_workers: usize) -> DispatchPool {
        DispatchPool {
            permits: Arc::new(Semaphore::new(max_workers)),
        }
    }

    /// Queue a task. Never blocks the caller.
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            task.await;
        });
    }
}

impl Default for DispatchPool {
    fn default() -> Self {
        DispatchPool::new()
    }
}
