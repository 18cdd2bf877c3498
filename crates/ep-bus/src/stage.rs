//! # Stage Runtime
//!
//! A stage is `{input queue, worker policy, handler fn, named outputs}`.
//! This module owns the worker-policy loops; each pipeline crate builds
//! its named-output wiring on top by calling one of the `spawn_*`
//! functions with its own handler closure.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::pending::PendingTracker;

/// The four worker policies a stage can run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPolicy {
    /// One worker, strict FIFO order preserved.
    Sequential,
    /// One worker on a dedicated blocking thread, for stages that do
    /// blocking I/O (the PCES writer).
    SequentialThread,
    /// `workers` tokio tasks pulling from a shared queue; completion
    /// order is not preserved (the hasher).
    Concurrent { workers: usize },
    /// Runs in the caller's own task rather than a spawned one (the
    /// PCES replayer, and ad hoc flush-triggered calls).
    DirectInline,
}

/// A handle to a running stage: lets the wiring layer wait for it to
/// drain (`flush`) or tear it down (`shutdown`).
pub struct StageHandle {
    name: &'static str,
    pending: Arc<PendingTracker>,
    joins: Vec<JoinHandle<()>>,
}

impl StageHandle {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn pending(&self) -> Arc<PendingTracker> {
        self.pending.clone()
    }

    /// Blocks until the queue is empty and the in-flight handler call
    /// (if any) has returned flush contract.
    pub async fn flush(&self) {
        self.pending.wait_until_zero().await;
    }

    /// Aborts all worker tasks. Pending items in the queue are dropped,
    /// matching the pipeline shutdown contract 
    pub fn shutdown(&self) {
        for join in &self.joins {
            join.abort();
        }
    }
}

/// Spawns a single-worker, strict-FIFO stage.
pub fn spawn_sequential<In, H, Fut>(
    name: &'static str,
    mut rx: tokio::sync::mpsc::Receiver<In>,
    pending: Arc<PendingTracker>,
    handler: H,
) -> StageHandle
where
    In: Send + 'static,
    H: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    let handler = Arc::new(handler);
    let worker_pending = pending.clone();
    let join = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            handler(item).await;
            worker_pending.decrement();
        }
    });
    StageHandle {
        name,
        pending,
        joins: vec![join],
    }
}

/// Spawns a fixed pool of workers sharing one input queue. Handler
/// completion order across items is not guaranteed; used by the hasher,
/// whose ordering is re-established downstream by the post-hash
/// collector.
pub fn spawn_concurrent<In, H, Fut>(
    name: &'static str,
    rx: tokio::sync::mpsc::Receiver<In>,
    pending: Arc<PendingTracker>,
    workers: usize,
    handler: H,
) -> StageHandle
where
    In: Send + 'static,
    H: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    let rx = Arc::new(Mutex::new(rx));
    let handler = Arc::new(handler);
    let mut joins = Vec::with_capacity(workers.max(1));
    for _ in 0..workers.max(1) {
        let rx = rx.clone();
        let handler = handler.clone();
        let worker_pending = pending.clone();
        joins.push(tokio::spawn(async move {
            loop {
                let item = {
                    let mut guard = rx.lock().await;
                    guard.recv().await
                };
                match item {
                    Some(item) => {
                        handler(item).await;
                        worker_pending.decrement();
                    }
                    None => break,
                }
            }
        }));
    }
    StageHandle { name, pending, joins }
}

/// Spawns a single worker on a dedicated blocking thread, for handlers
/// that perform blocking I/O (the PCES writer's fsync-bearing appends).
pub fn spawn_sequential_thread<In, H>(
    name: &'static str,
    mut rx: tokio::sync::mpsc::Receiver<In>,
    pending: Arc<PendingTracker>,
    handler: H,
) -> StageHandle
where
    In: Send + 'static,
    H: Fn(In) + Send + 'static,
{
    let worker_pending = pending.clone();
    let join = tokio::task::spawn_blocking(move || {
        while let Some(item) = rx.blocking_recv() {
            handler(item);
            worker_pending.decrement();
        }
    });
    StageHandle {
        name,
        pending,
        joins: vec![join],
    }
}

/// Runs a handler directly in the caller's task, bypassing queueing
/// entirely. Used by the PCES replayer at startup and by one-shot
/// direct-inline calls.
pub async fn run_direct<In, H, Fut>(item: In, handler: H)
where
    H: FnOnce(In) -> Fut,
    Fut: Future<Output = ()>,
{
    handler(item).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Wire;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_sequential_stage_processes_in_order() {
        let (wire, rx, pending) = Wire::channel(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let handle = spawn_sequential("test", rx, pending, move |item: u32| {
            let seen = seen2.clone();
            async move {
                seen.lock().await.push(item);
            }
        });

        for i in 0..5u32 {
            wire.solder_to(i).await.unwrap();
        }
        handle.flush().await;
        assert_eq!(*seen.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_concurrent_stage_processes_all_items() {
        let (wire, rx, pending) = Wire::channel(16);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let handle = spawn_concurrent("test-concurrent", rx, pending, 4, move |_: u32| {
            let count = count2.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        for i in 0..20u32 {
            wire.solder_to(i).await.unwrap();
        }
        handle.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 20);
    }
}
