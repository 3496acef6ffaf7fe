//! Scheduled in-process queue.
//!
//! Jobs enqueued without a time go to the back of the ready deque; jobs with
//! a future time sit in a schedule ordered by due instant and enqueue order,
//! and are promoted to the ready deque once due. Timing uses `tokio::time`,
//! so tests with a paused clock see delays elapse deterministically.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use weft_core::queue::JobQueue;
use weft_types::error::QueueError;
use weft_types::job::JobPayload;

/// A job that exhausted its retries or failed with a non-retryable error.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadJob {
    pub job: JobPayload,
    pub error: String,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<JobPayload>,
    scheduled: BTreeMap<(Instant, u64), JobPayload>,
    dead: Vec<DeadJob>,
    seq: u64,
    closed: bool,
}

impl QueueState {
    fn schedule(&mut self, job: JobPayload, due: Instant) {
        self.seq += 1;
        self.scheduled.insert((due, self.seq), job);
    }

    /// Move every due job onto the ready deque, earliest first.
    fn promote_due(&mut self, now: Instant) {
        while let Some(entry) = self.scheduled.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let job = entry.remove();
            self.ready.push_back(job);
        }
    }
}

struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// In-process implementation of `JobQueue`. Cloning shares the queue.
#[derive(Clone)]
pub struct LocalQueue {
    inner: Arc<Inner>,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Take the next job that is due, if any.
    pub async fn pop_ready(&self) -> Option<JobPayload> {
        let mut state = self.inner.state.lock().await;
        state.promote_due(Instant::now());
        state.ready.pop_front()
    }

    /// When the earliest scheduled job becomes due. `Some(now)` or earlier
    /// if a job is ready right away, `None` if the queue is empty.
    pub async fn next_due(&self) -> Option<Instant> {
        let state = self.inner.state.lock().await;
        if !state.ready.is_empty() {
            return Some(Instant::now());
        }
        state.scheduled.keys().next().map(|(due, _)| *due)
    }

    /// Schedule `job` to run after `delay`. Used for retries.
    pub async fn retry(&self, job: JobPayload, delay: Duration) {
        let mut state = self.inner.state.lock().await;
        state.schedule(job, Instant::now() + delay);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Record a job as dead.
    pub async fn bury(&self, job: JobPayload, error: String) {
        self.inner.state.lock().await.dead.push(DeadJob { job, error });
    }

    /// Dead jobs, oldest first.
    pub async fn dead_jobs(&self) -> Vec<DeadJob> {
        self.inner.state.lock().await.dead.clone()
    }

    /// Jobs waiting to run (ready or scheduled).
    pub async fn len(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.ready.len() + state.scheduled.len()
    }

    /// True when no job is ready or scheduled.
    pub async fn is_idle(&self) -> bool {
        self.len().await == 0
    }

    /// Reject further enqueues. Jobs already queued stay queued.
    pub async fn close(&self) {
        self.inner.state.lock().await.closed = true;
        self.inner.notify.notify_one();
    }

    /// Resolves after the next enqueue, retry or close.
    pub async fn notified(&self) {
        self.inner.notify.notified().await;
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalQueue").finish_non_exhaustive()
    }
}

impl JobQueue for LocalQueue {
    async fn enqueue(&self, job: JobPayload, at: Option<DateTime<Utc>>) -> Result<String, QueueError> {
        let jid = job.jid.clone();
        let delay = at
            .and_then(|at| (at - Utc::now()).to_std().ok())
            .filter(|delay| !delay.is_zero());

        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        match delay {
            Some(delay) => state.schedule(job, Instant::now() + delay),
            None => state.ready.push_back(job),
        }
        drop(state);

        self.inner.notify.notify_one();
        tracing::trace!(jid = %jid, delayed = delay.is_some(), "job enqueued");
        Ok(jid)
    }
}
