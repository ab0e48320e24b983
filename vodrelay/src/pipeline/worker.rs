//! Semaphore-bounded worker pool.
//!
//! N worker tasks share one FIFO queue. A worker dequeues a job, waits
//! for a concurrency slot, runs the pipeline, and releases the slot on
//! every path. Semaphore acquisition is FIFO, so jobs start in enqueue
//! order even when all slots are busy; completion order is unspecified
//! for N > 1.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::JobQueue;
use super::run::RunContext;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum concurrently running pipelines.
    pub workers: usize,
    /// Poll interval for the dequeue wait, so the loop can observe the
    /// shutdown flag even when the queue stays empty.
    pub poll_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            poll_interval_ms: 100,
        }
    }
}

/// Counting pool of permissions to run one pipeline, instrumented so
/// tests can verify the concurrency bound.
pub struct SlotPool {
    semaphore: Arc<Semaphore>,
    in_use: AtomicUsize,
    high_water: AtomicUsize,
}

impl SlotPool {
    pub fn new(slots: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(slots)),
            in_use: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        }
    }

    /// Waits for a free slot. Waiters are served in FIFO order.
    pub async fn acquire(self: &Arc<Self>) -> SlotPermit {
        // The semaphore is never closed while the pool is alive
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("slot semaphore closed");
        let in_use = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(in_use, Ordering::SeqCst);
        SlotPermit {
            _permit: permit,
            pool: self.clone(),
        }
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Most slots ever held simultaneously.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

/// Held for the duration of one pipeline run; releasing is automatic
/// and unconditional.
pub struct SlotPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
    pool: Arc<SlotPool>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The scheduling core: owns the worker tasks and the slot pool.
pub struct WorkerPool {
    config: PoolConfig,
    queue: Arc<JobQueue>,
    slots: Arc<SlotPool>,
    cancel: CancellationToken,
    tasks: parking_lot::Mutex<JoinSet<()>>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig, queue: Arc<JobQueue>) -> Self {
        let slots = Arc::new(SlotPool::new(config.workers));
        Self {
            config,
            queue,
            slots,
            cancel: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(JoinSet::new()),
        }
    }

    pub fn slots(&self) -> &Arc<SlotPool> {
        &self.slots
    }

    /// Launches the worker loops against a resolved run context.
    pub fn start(&self, run: Arc<RunContext>) {
        info!(workers = self.config.workers, "starting worker pool");
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        let mut tasks = self.tasks.lock();
        for worker_id in 0..self.config.workers {
            let queue = self.queue.clone();
            let slots = self.slots.clone();
            let cancel = self.cancel.clone();
            let run = run.clone();

            tasks.spawn(async move {
                debug!(worker_id, "worker started");
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(worker_id, "worker shutting down");
                            break;
                        }
                        _ = queue.notified() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }

                    while let Some(job) = queue.try_dequeue() {
                        let permit = slots.acquire().await;

                        debug!(worker_id, job_id = %job.id, seq = job.seq, "worker picked up job");
                        // The run notifies the requester on both
                        // outcomes; the loop only logs and moves on
                        if let Err(e) = run.run(&job).await {
                            error!(
                                worker_id,
                                job_id = %job.id,
                                seq = job.seq,
                                error = %e,
                                "job failed"
                            );
                        }
                        drop(permit);

                        queue.mark_done();
                    }
                }
            });
        }
    }

    /// Drains the queue, then stops and joins the workers.
    ///
    /// Every accepted job is processed before workers are told to stop;
    /// in-flight pipelines finish, they are never interrupted.
    pub async fn stop(&self) {
        info!("stopping worker pool, waiting for queue to drain");
        self.queue.wait_idle().await;
        self.cancel.cancel();

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "worker task ended abnormally");
            }
        }
        info!("worker pool stopped");
    }
}
