//! Key-Affine Task Execution
//!
//! Offload, delete, and scan work runs on a fixed pool of workers. Tasks
//! carry a routing key (the ledger id, or a segment's hashed uuid) and all
//! tasks sharing a key land on the same worker, so operations against one
//! ledger never interleave. Tasks with different keys run concurrently on
//! different workers.
//!
//! Each worker is a tokio task draining an unbounded channel; `shutdown`
//! closes the channels and waits for every worker to finish its queue.

use futures::future::BoxFuture;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

type Task = BoxFuture<'static, ()>;

pub struct ShardedExecutor {
    senders: Mutex<Option<Vec<mpsc::UnboundedSender<Task>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ShardedExecutor {
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let mut senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);

        for worker in 0..worker_count {
            let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
            senders.push(tx);
            workers.push(tokio::spawn(async move {
                debug!(worker, "offload worker started");
                while let Some(task) = rx.recv().await {
                    task.await;
                }
                debug!(worker, "offload worker stopped");
            }));
        }

        Self {
            senders: Mutex::new(Some(senders)),
            workers: Mutex::new(workers),
        }
    }

    /// Queue a task on the worker owning `key`.
    ///
    /// Returns `false` if the executor has shut down.
    pub fn spawn_on<F>(&self, key: u64, task: F) -> bool
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let senders = self.senders.lock().expect("executor lock poisoned");
        let Some(senders) = senders.as_ref() else {
            return false;
        };
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let worker = (hasher.finish() % senders.len() as u64) as usize;
        senders[worker].send(Box::pin(task)).is_ok()
    }

    /// Close the queues and wait for in-flight tasks to finish.
    pub async fn shutdown(&self) {
        // Dropping the senders lets each worker drain and exit.
        self.senders.lock().expect("executor lock poisoned").take();
        let workers = std::mem::take(&mut *self.workers.lock().expect("executor lock poisoned"));
        for worker in workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_same_key_runs_in_order() {
        let executor = ShardedExecutor::new(4);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..16u64 {
            let order = order.clone();
            executor.spawn_on(7, async move {
                // Yield so reordering would surface if tasks interleaved.
                tokio::task::yield_now().await;
                order.lock().unwrap().push(i);
            });
        }
        executor.shutdown().await;

        let order = order.lock().unwrap();
        assert_eq!(*order, (0..16).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_tasks() {
        let executor = ShardedExecutor::new(2);
        let done = Arc::new(AtomicUsize::new(0));

        for key in 0..10u64 {
            let done = done.clone();
            executor.spawn_on(key, async move {
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        executor.shutdown().await;

        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert!(!executor.spawn_on(0, async {}));
    }
}
