//! Per-job execution context.
//!
//! Built by the runtime bridge for every job and handed to the task body by
//! reference. Nothing here is ambient: two jobs running concurrently on the
//! same worker each get their own context, and it is dropped on every exit
//! path of the job.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use weft_types::continuation::ContinuationStack;
use weft_types::job::JobPayload;

use super::engine::{EngineError, RunEngine};
use crate::queue::JobQueue;
use crate::storage::memory::{BoxMemory, MemoryError};
use crate::storage::store::SharedStore;

/// Object-safe handle for refreshing barrier TTLs from inside a task body.
pub trait BarrierLease: Send + Sync {
    /// Refresh every barrier named in `stack`; returns how many still existed.
    fn extend_boxed<'a>(
        &'a self,
        stack: &'a ContinuationStack,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<usize, EngineError>>;

    /// The configured barrier TTL.
    fn default_ttl(&self) -> Duration;
}

impl<S: SharedStore, Q: JobQueue> BarrierLease for RunEngine<S, Q> {
    fn extend_boxed<'a>(
        &'a self,
        stack: &'a ContinuationStack,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<usize, EngineError>> {
        Box::pin(self.extend_ttl(stack, ttl))
    }

    fn default_ttl(&self) -> Duration {
        self.settings().barrier.ttl
    }
}

/// Execution context of one job attempt.
pub struct JobContext {
    run_id: Option<String>,
    jid: String,
    attempt: u32,
    target: String,
    continuations: ContinuationStack,
    lease: Option<Arc<dyn BarrierLease>>,
    memory: Option<Arc<BoxMemory>>,
}

impl JobContext {
    pub fn new(job: &JobPayload, continuations: ContinuationStack) -> Self {
        Self {
            run_id: job.run_id.clone(),
            jid: job.jid.clone(),
            attempt: job.attempt,
            target: job.target.clone(),
            continuations,
            lease: None,
            memory: None,
        }
    }

    /// A context outside any workflow run, for calling handlers directly.
    pub fn detached(target: impl Into<String>) -> Self {
        Self {
            run_id: None,
            jid: String::new(),
            attempt: 1,
            target: target.into(),
            continuations: ContinuationStack::new(),
            lease: None,
            memory: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_lease(mut self, lease: Arc<dyn BarrierLease>) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn with_memory(mut self, memory: Option<Arc<BoxMemory>>) -> Self {
        self.memory = memory;
        self
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn jid(&self) -> &str {
        &self.jid
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Continuations this job is responsible for resolving.
    pub fn continuations(&self) -> &ContinuationStack {
        &self.continuations
    }

    pub fn memory(&self) -> Option<&BoxMemory> {
        self.memory.as_deref()
    }

    /// Keep the barriers this job will resolve alive while a long task runs.
    ///
    /// `None` uses the configured barrier TTL. Returns how many barriers were
    /// refreshed; without a lease (detached context) this is always 0.
    pub async fn extend_ttl(&self, ttl: Option<Duration>) -> Result<usize, EngineError> {
        let Some(lease) = &self.lease else {
            return Ok(0);
        };
        if self.continuations.is_empty() {
            return Ok(0);
        }
        let ttl = ttl.unwrap_or_else(|| lease.default_ttl());
        lease.extend_boxed(&self.continuations, ttl).await
    }

    /// Read previously persisted outputs of this run.
    ///
    /// Returns an empty map when memory is disabled or the job has no run id.
    pub async fn hydrate(&self, fields: &[String]) -> Result<Map<String, Value>, MemoryError> {
        match (&self.memory, &self.run_id) {
            (Some(memory), Some(run_id)) if !fields.is_empty() => memory.read(run_id, fields).await,
            _ => Ok(Map::new()),
        }
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("run_id", &self.run_id)
            .field("jid", &self.jid)
            .field("attempt", &self.attempt)
            .field("target", &self.target)
            .field("continuations", &self.continuations.len())
            .field("lease", &self.lease.is_some())
            .field("memory", &self.memory.is_some())
            .finish()
    }
}
