//! Fixed-size worker pool for rate-paced external lookups.
//!
//! Items are dealt round-robin into one lane per worker (worker `k` gets
//! items `k, k+P, k+2P, …`), each lane is cut into batches, and every worker
//! drains its own queue until it reads the stop marker. The driver collects
//! exactly one result per dispatched batch, then joins the workers with a
//! bounded grace period and aborts any that are still alive.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Idle,
    Running,
    Draining,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub batch_size: usize,
    /// Upper bound from the request quota.
    pub rate_bound: usize,
    /// Upper bound from the host, normally `2 × available_parallelism`.
    pub parallelism_bound: usize,
    pub shutdown_grace: Duration,
}

impl PoolOptions {
    pub fn new(batch_size: usize, rate_bound: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            rate_bound: rate_bound.max(1),
            parallelism_bound: default_parallelism_bound(None),
            shutdown_grace: Duration::from_millis(500),
        }
    }

    pub fn with_parallelism_bound(mut self, bound: usize) -> Self {
        self.parallelism_bound = bound.max(1);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// `2 × available_parallelism`, optionally capped.
pub fn default_parallelism_bound(cap: Option<usize>) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let bound = 2 * cores;
    cap.map_or(bound, |c| bound.min(c.max(1)))
}

/// `min(parallelism, rate bound, batches)`; zero only when there is no work.
pub fn worker_count(parallelism_bound: usize, rate_bound: usize, batches: usize) -> usize {
    if batches == 0 {
        return 0;
    }
    parallelism_bound.min(rate_bound).min(batches).max(1)
}

/// Deals `items` into `lanes` sublists by striding: lane `k` holds the items
/// at indices `k, k+lanes, k+2·lanes, …` in their original relative order.
pub fn stride_partition<T>(items: Vec<T>, lanes: usize) -> Vec<Vec<T>> {
    let lanes = lanes.max(1);
    let mut out: Vec<Vec<T>> = (0..lanes).map(|_| Vec::new()).collect();
    for (i, item) in items.into_iter().enumerate() {
        out[i % lanes].push(item);
    }
    out
}

fn into_batches<T>(lane: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let mut batches = Vec::new();
    let mut current = Vec::with_capacity(batch_size);
    for item in lane {
        current.push(item);
        if current.len() == batch_size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(batch_size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

enum Job<T> {
    Batch(Vec<T>),
    Stop,
}

/// Output of one batch, tagged with the worker that produced it.
#[derive(Debug)]
pub struct BatchResult<R> {
    pub worker: usize,
    pub items: Vec<R>,
}

pub struct WorkerPool {
    name: &'static str,
    options: PoolOptions,
    state: PoolState,
    workers: usize,
}

impl WorkerPool {
    pub fn new(name: &'static str, options: PoolOptions) -> Self {
        Self {
            name,
            options,
            state: PoolState::Idle,
            workers: 0,
        }
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Workers used by the last `run`.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `handler` over every batch and returns one result per batch.
    /// Result order across workers is unspecified.
    pub async fn run<T, R, F, Fut>(&mut self, items: Vec<T>, handler: F) -> Vec<BatchResult<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<R>> + Send + 'static,
    {
        if items.is_empty() {
            self.workers = 0;
            self.state = PoolState::Terminated;
            return Vec::new();
        }

        let batch_size = self.options.batch_size.max(1);
        let estimated_batches = items.len().div_ceil(batch_size);
        let workers = worker_count(
            self.options.parallelism_bound,
            self.options.rate_bound,
            estimated_batches,
        );
        self.workers = workers;

        let handler = Arc::new(handler);
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<BatchResult<R>>();
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(workers);
        let mut dispatched = 0usize;

        self.state = PoolState::Running;
        for (worker, lane) in stride_partition(items, workers).into_iter().enumerate() {
            let (job_tx, job_rx) = mpsc::unbounded_channel::<Job<T>>();
            for batch in into_batches(lane, batch_size) {
                dispatched += 1;
                // The receiver is alive until the worker reads Stop.
                let _ = job_tx.send(Job::Batch(batch));
            }
            let _ = job_tx.send(Job::Stop);

            handles.push(tokio::spawn(worker_loop(
                worker,
                job_rx,
                result_tx.clone(),
                Arc::clone(&handler),
            )));
        }
        drop(result_tx);

        debug!(pool = self.name, workers, batches = dispatched, "worker pool started");

        let mut results = Vec::with_capacity(dispatched);
        while results.len() < dispatched {
            match result_rx.recv().await {
                Some(result) => results.push(result),
                None => {
                    warn!(
                        pool = self.name,
                        received = results.len(),
                        expected = dispatched,
                        "all workers exited before every batch reported"
                    );
                    break;
                }
            }
        }

        self.state = PoolState::Draining;
        self.reap(handles).await;
        self.state = PoolState::Terminated;

        debug!(pool = self.name, results = results.len(), "worker pool terminated");
        results
    }

    async fn reap(&self, handles: Vec<JoinHandle<()>>) {
        for (worker, mut handle) in handles.into_iter().enumerate() {
            match timeout(self.options.shutdown_grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(pool = self.name, worker, error = %e, "worker ended abnormally");
                }
                Err(_) => {
                    handle.abort();
                    warn!(pool = self.name, worker, "worker still alive after grace period, aborted");
                }
            }
        }
    }
}

async fn worker_loop<T, R, F, Fut>(
    worker: usize,
    mut jobs: UnboundedReceiver<Job<T>>,
    results: UnboundedSender<BatchResult<R>>,
    handler: Arc<F>,
) where
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Vec<R>>,
{
    let mut processed = 0usize;
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Stop => break,
            Job::Batch(batch) => {
                let items = (handler.as_ref())(batch).await;
                processed += 1;
                if results.send(BatchResult { worker, items }).is_err() {
                    break;
                }
            }
        }
    }
    debug!(worker, batches = processed, "worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_partition_interleaves() {
        let lanes = stride_partition((0..10).collect::<Vec<_>>(), 3);
        assert_eq!(lanes, vec![vec![0, 3, 6, 9], vec![1, 4, 7], vec![2, 5, 8]]);
    }

    #[test]
    fn stride_partition_more_lanes_than_items() {
        let lanes = stride_partition(vec!['a', 'b'], 4);
        assert_eq!(lanes, vec![vec!['a'], vec!['b'], vec![], vec![]]);
    }

    #[test]
    fn worker_count_never_exceeds_batches() {
        assert_eq!(worker_count(16, 8, 3), 3);
        assert_eq!(worker_count(16, 8, 100), 8);
        assert_eq!(worker_count(4, 8, 100), 4);
        assert_eq!(worker_count(4, 8, 0), 0);
    }

    #[test]
    fn batches_keep_order() {
        let batches = into_batches(vec![1, 2, 3, 4, 5], 2);
        assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[tokio::test]
    async fn empty_input_spawns_nothing() {
        let mut pool = WorkerPool::new("test", PoolOptions::new(2, 4));
        let results = pool.run(Vec::<u32>::new(), |b| async move { b }).await;
        assert!(results.is_empty());
        assert_eq!(pool.workers(), 0);
        assert_eq!(pool.state(), PoolState::Terminated);
    }

    #[tokio::test]
    async fn every_batch_reports_once() {
        let options = PoolOptions::new(3, 4).with_parallelism_bound(8);
        let mut pool = WorkerPool::new("test", options);

        let results = pool
            .run((0..20u32).collect(), |batch| async move {
                batch.into_iter().map(|n| n * 10).collect::<Vec<_>>()
            })
            .await;

        assert_eq!(pool.workers(), 4);
        assert_eq!(pool.state(), PoolState::Terminated);
        // 4 lanes of 5 items, cut into batches of 3 → 2 batches per lane.
        assert_eq!(results.len(), 8);

        let mut all: Vec<u32> = results.into_iter().flat_map(|r| r.items).collect();
        all.sort_unstable();
        assert_eq!(all, (0..20u32).map(|n| n * 10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn stuck_worker_is_aborted_after_grace() {
        let options = PoolOptions::new(1, 1).with_shutdown_grace(Duration::from_millis(10));
        let pool = WorkerPool::new("test", options);

        let stuck = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
        let abort = stuck.abort_handle();

        let started = std::time::Instant::now();
        pool.reap(vec![stuck]).await;
        assert!(started.elapsed() < Duration::from_secs(5));

        for _ in 0..100 {
            if abort.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(abort.is_finished());
    }

    #[tokio::test]
    async fn worker_sees_its_stride_in_order() {
        let options = PoolOptions::new(3, 3).with_parallelism_bound(3);
        let mut pool = WorkerPool::new("test", options);

        let results = pool.run((0..9usize).collect(), |batch| async move { batch }).await;

        assert_eq!(results.len(), 3);
        for result in results {
            let expected: Vec<usize> = (result.worker..9).step_by(3).collect();
            assert_eq!(result.items, expected);
        }
    }
}
