//! In-memory FIFO job queue.
//!
//! Unbounded and insertion-ordered; enqueue never blocks and never
//! fails. The queue also tracks how many dequeued jobs are still being
//! processed so shutdown can wait for in-flight work to finish.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::job::Job;

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<Job>,
    in_flight: usize,
}

/// FIFO queue of job descriptors shared between the front end and the
/// worker pool.
#[derive(Default)]
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    /// Woken when an item is enqueued.
    item_available: Notify,
    /// Woken when a dequeued item is marked done.
    item_done: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a job. Never blocks, never fails.
    pub fn enqueue(&self, job: Job) {
        let mut inner = self.inner.lock();
        debug!(job_id = %job.id, seq = job.seq, "job enqueued");
        inner.pending.push_back(job);
        drop(inner);
        self.item_available.notify_one();
    }

    /// Number of jobs waiting to be dequeued.
    pub fn queue_size(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// True when nothing is pending and nothing is being processed.
    pub fn is_idle(&self) -> bool {
        let inner = self.inner.lock();
        inner.pending.is_empty() && inner.in_flight == 0
    }

    /// Pops the oldest job and counts it as in flight.
    pub(crate) fn try_dequeue(&self) -> Option<Job> {
        let mut inner = self.inner.lock();
        let job = inner.pending.pop_front();
        if job.is_some() {
            inner.in_flight += 1;
        }
        job
    }

    /// Marks one previously dequeued job as finished.
    pub(crate) fn mark_done(&self) {
        let mut inner = self.inner.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        let idle = inner.pending.is_empty() && inner.in_flight == 0;
        drop(inner);
        self.item_done.notify_waiters();
        if idle {
            debug!("job queue drained");
        }
    }

    /// Completes when an item may be available to dequeue.
    pub(crate) async fn notified(&self) {
        self.item_available.notified().await;
    }

    /// Waits until every accepted job has been marked done.
    pub async fn wait_idle(&self) {
        loop {
            // Register before checking so a mark_done between the check
            // and the await cannot be missed
            let mut done = std::pin::pin!(self.item_done.notified());
            done.as_mut().enable();
            if self.is_idle() {
                return;
            }
            done.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(seq: u32) -> Job {
        Job::new("https://example.com/a.m3u8", "B", "S", seq, 3, 1)
    }

    #[test]
    fn dequeues_in_fifo_order() {
        let queue = JobQueue::new();
        for seq in 1..=3 {
            queue.enqueue(job(seq));
        }
        assert_eq!(queue.queue_size(), 3);

        let order: Vec<u32> = (0..3)
            .map(|_| queue.try_dequeue().unwrap().seq)
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(queue.queue_size(), 0);
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn idle_tracks_in_flight_jobs() {
        let queue = JobQueue::new();
        assert!(queue.is_idle());

        queue.enqueue(job(1));
        assert!(!queue.is_idle());

        let _job = queue.try_dequeue().unwrap();
        assert_eq!(queue.queue_size(), 0);
        assert!(!queue.is_idle());

        queue.mark_done();
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn wait_idle_returns_once_work_completes() {
        let queue = std::sync::Arc::new(JobQueue::new());
        queue.enqueue(job(1));
        let _job = queue.try_dequeue().unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_idle().await })
        };
        // Give the waiter a chance to register before completing the job
        tokio::task::yield_now().await;
        queue.mark_done();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
