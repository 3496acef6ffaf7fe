//! Worker pool for the local queue.
//!
//! A [`Worker`] pulls due jobs from a [`LocalQueue`], executes each through
//! the runtime bridge and applies the retry policy to failures:
//!
//! - non-retryable errors (unknown target, malformed payload, invalid input)
//!   send the job straight to the dead list,
//! - retryable errors reschedule the next attempt after an exponential
//!   backoff while the job's retry budget lasts, then the job is dead.
//!
//! The retry budget is the job's `retry` option, or
//! `QueueConfig::default_retries` when the option is absent.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use weft_core::storage::store::SharedStore;
use weft_core::workflow::bridge::RuntimeBridge;
use weft_types::config::QueueConfig;
use weft_types::job::JobPayload;

use super::local::LocalQueue;

/// Upper bound on the backoff exponent.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Retry and concurrency settings for a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub default_retries: u32,
    pub backoff_base: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for WorkerSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            default_retries: config.default_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        }
    }
}

impl WorkerSettings {
    /// Backoff before attempt `attempt + 1`: `base * 2^(attempt - 1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

/// What happened to one job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Retrying { attempt: u32 },
    Dead,
}

/// Counters over the jobs a worker processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub executed: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub dead: usize,
}

impl WorkerStats {
    fn record(&mut self, status: JobStatus) {
        self.executed += 1;
        match status {
            JobStatus::Succeeded => self.succeeded += 1,
            JobStatus::Retrying { .. } => self.retried += 1,
            JobStatus::Dead => self.dead += 1,
        }
    }

    fn record_joined(&mut self, result: Result<JobStatus, JoinError>) {
        match result {
            Ok(status) => self.record(status),
            Err(e) => tracing::warn!(error = %e, "worker task failed to join"),
        }
    }
}

/// Pulls jobs from the bridge's [`LocalQueue`] and executes them.
pub struct Worker<S: SharedStore + 'static> {
    bridge: Arc<RuntimeBridge<S, LocalQueue>>,
    queue: LocalQueue,
    settings: WorkerSettings,
}

impl<S: SharedStore + 'static> Clone for Worker<S> {
    fn clone(&self) -> Self {
        Self {
            bridge: Arc::clone(&self.bridge),
            queue: self.queue.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<S: SharedStore + 'static> Worker<S> {
    pub fn new(bridge: Arc<RuntimeBridge<S, LocalQueue>>, settings: WorkerSettings) -> Self {
        let queue = bridge.engine().queue().clone();
        Self {
            bridge,
            queue,
            settings,
        }
    }

    pub fn queue(&self) -> &LocalQueue {
        &self.queue
    }

    pub fn bridge(&self) -> &Arc<RuntimeBridge<S, LocalQueue>> {
        &self.bridge
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Execute one job and apply the retry policy to its failure.
    pub async fn process(&self, job: JobPayload) -> JobStatus {
        let error = match self.bridge.execute(&job).await {
            Ok(outcome) => {
                tracing::debug!(
                    jid = %job.jid,
                    released = outcome.released,
                    "job succeeded"
                );
                return JobStatus::Succeeded;
            }
            Err(e) => e,
        };

        let max_retries = job.max_retries().unwrap_or(self.settings.default_retries);
        if error.is_retryable() && job.attempt <= max_retries {
            let delay = self.settings.backoff(job.attempt);
            let next = job.next_attempt();
            let attempt = next.attempt;
            tracing::warn!(
                jid = %job.jid,
                target = %job.target,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "job failed, retrying"
            );
            self.queue.retry(next, delay).await;
            JobStatus::Retrying { attempt }
        } else {
            tracing::error!(
                jid = %job.jid,
                target = %job.target,
                attempt = job.attempt,
                retryable = error.is_retryable(),
                error = %error,
                "job failed permanently"
            );
            self.queue.bury(job, error.to_string()).await;
            JobStatus::Dead
        }
    }

    /// Run jobs one at a time until nothing is ready or scheduled, sleeping
    /// through delays and retry backoffs.
    pub async fn drain(&self) -> WorkerStats {
        let mut stats = WorkerStats::default();
        loop {
            if let Some(job) = self.queue.pop_ready().await {
                stats.record(self.process(job).await);
                continue;
            }
            match self.queue.next_due().await {
                Some(due) => tokio::time::sleep_until(due).await,
                None => return stats,
            }
        }
    }

    /// Run up to `concurrency` jobs at once until the queue is idle and no
    /// job is in flight.
    pub async fn run_until_idle(&self) -> WorkerStats {
        self.pump(&CancellationToken::new(), true).await
    }

    /// Run up to `concurrency` jobs at once until `cancel` fires. In-flight
    /// jobs finish before this returns.
    pub async fn run(&self, cancel: CancellationToken) -> WorkerStats {
        self.pump(&cancel, false).await
    }

    async fn pump(&self, cancel: &CancellationToken, until_idle: bool) -> WorkerStats {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks: JoinSet<JobStatus> = JoinSet::new();
        let mut stats = WorkerStats::default();

        tracing::info!(
            concurrency = self.settings.concurrency,
            until_idle,
            "worker started"
        );

        loop {
            while let Some(result) = tasks.try_join_next() {
                stats.record_joined(result);
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if let Some(job) = self.queue.pop_ready().await {
                let worker = self.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    worker.process(job).await
                });
                continue;
            }
            drop(permit);

            let next_due = self.queue.next_due().await;
            if until_idle && next_due.is_none() && tasks.is_empty() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.queue.notified() => {}
                _ = sleep_until(next_due) => {}
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    stats.record_joined(result);
                }
            }
        }

        while let Some(result) = tasks.join_next().await {
            stats.record_joined(result);
        }

        tracing::info!(
            executed = stats.executed,
            succeeded = stats.succeeded,
            retried = stats.retried,
            dead = stats.dead,
            "worker stopped"
        );
        stats
    }
}

fn sleep_until(due: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match due {
            Some(due) => tokio::time::sleep_until(due).await,
            None => std::future::pending().await,
        }
    }
}
