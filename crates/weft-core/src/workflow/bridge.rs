//! Runtime bridge.
//!
//! Wraps every job execution. The queue worker hands a [`JobPayload`] to
//! [`RuntimeBridge::execute`], which:
//!
//! 1. looks the target up in the task registry,
//! 2. decodes the job's continuation stack and builds its [`JobContext`],
//! 3. runs the task body,
//! 4. on success, persists the output to workflow memory (if configured),
//! 5. walks the continuation stack from the top: arrive at each barrier, and
//!    on release reduce the continuation's remaining sub-DAG with the rest of
//!    the stack. A non-propagating continuation ends the walk.
//!
//! A failed body touches no barrier; the job queue's retry policy decides
//! what happens next.

use std::sync::Arc;

use tracing::Instrument;
use weft_types::continuation::ContinuationStack;
use weft_types::job::JobPayload;

use super::barrier::BarrierError;
use super::context::{BarrierLease, JobContext};
use super::continuation::ContinuationError;
use super::engine::{EngineError, RunEngine};
use crate::queue::JobQueue;
use crate::storage::memory::{BoxMemory, MemoryError};
use crate::storage::store::SharedStore;
use crate::task::handler::{TaskError, TaskOutput};
use crate::task::registry::TaskRegistry;

/// Errors from executing one job.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("no task registered for '{0}'")]
    UnknownTask(String),

    #[error("task '{target}' failed: {source}")]
    Task {
        target: String,
        #[source]
        source: TaskError,
    },

    #[error(transparent)]
    Continuation(#[from] ContinuationError),

    #[error(transparent)]
    Barrier(#[from] BarrierError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("job carries continuations but no workflow run id")]
    MissingRunId,
}

impl BridgeError {
    /// Whether the queue should retry the job.
    ///
    /// Construction errors (unknown targets, malformed payloads, contract
    /// violations) fail the same way every time; store and queue failures are
    /// transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::UnknownTask(_) | BridgeError::MissingRunId => false,
            BridgeError::Task { source, .. } => source.is_retryable(),
            BridgeError::Continuation(ContinuationError::Codec(_)) => false,
            BridgeError::Continuation(_) => true,
            BridgeError::Barrier(BarrierError::Store(_)) => true,
            BridgeError::Barrier(_) => false,
            BridgeError::Engine(e) => e.is_retryable(),
            BridgeError::Memory(MemoryError::MissingRunId) => false,
            BridgeError::Memory(MemoryError::Store(_)) => true,
        }
    }
}

/// Result of a successful job execution.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub output: TaskOutput,
    /// Barriers this job released.
    pub released: usize,
    /// Whether a parked continuation was reduced (new jobs enqueued).
    pub resumed: bool,
}

/// Hook run by the queue worker around every job.
pub struct RuntimeBridge<S: SharedStore + 'static, Q: JobQueue + 'static> {
    engine: Arc<RunEngine<S, Q>>,
    registry: Arc<TaskRegistry>,
    memory: Option<Arc<BoxMemory>>,
}

impl<S: SharedStore + 'static, Q: JobQueue + 'static> RuntimeBridge<S, Q> {
    pub fn new(engine: Arc<RunEngine<S, Q>>, registry: Arc<TaskRegistry>) -> Self {
        Self {
            engine,
            registry,
            memory: None,
        }
    }

    /// Persist task outputs to, and hydrate typed inputs from, `memory`.
    pub fn with_memory(mut self, memory: Arc<BoxMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn engine(&self) -> &Arc<RunEngine<S, Q>> {
        &self.engine
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn memory(&self) -> Option<&Arc<BoxMemory>> {
        self.memory.as_ref()
    }

    /// Execute `job` and resolve its continuations.
    pub async fn execute(&self, job: &JobPayload) -> Result<JobOutcome, BridgeError> {
        let span = tracing::info_span!(
            "job",
            run_id = job.run_id.as_deref().unwrap_or("-"),
            jid = %job.jid,
            target = %job.target,
            attempt = job.attempt,
        );
        self.execute_inner(job).instrument(span).await
    }

    async fn execute_inner(&self, job: &JobPayload) -> Result<JobOutcome, BridgeError> {
        let handler = self
            .registry
            .get(&job.target)
            .ok_or_else(|| BridgeError::UnknownTask(job.target.clone()))?;

        let stack = match &job.continuations {
            Some(reference) => {
                self.engine
                    .settings()
                    .continuations
                    .retrieve(self.engine.store().as_ref(), reference)
                    .await?
            }
            None => ContinuationStack::new(),
        };

        let lease: Arc<dyn BarrierLease> = self.engine.clone();
        let ctx = JobContext::new(job, stack)
            .with_lease(lease)
            .with_memory(self.memory.clone());

        let output = handler
            .execute_boxed(&ctx, &job.args)
            .await
            .map_err(|source| {
                tracing::warn!(error = %source, "task failed");
                BridgeError::Task {
                    target: job.target.clone(),
                    source,
                }
            })?;

        if let (Some(memory), Some(run_id), Some(fields)) =
            (&self.memory, job.run_id.as_deref(), output.fields())
        {
            memory.write(run_id, fields).await?;
        }

        let (released, resumed) = self.resolve(job, ctx.continuations().clone()).await?;
        tracing::debug!(released, resumed, "job completed");

        Ok(JobOutcome {
            output,
            released,
            resumed,
        })
    }

    /// Walk the continuation stack after a successful body.
    ///
    /// Releases are at-most-once: a barrier won by a failed attempt stays
    /// released, so a retry cannot carry the win on to the barriers above it.
    async fn resolve(&self, job: &JobPayload, mut stack: ContinuationStack) -> Result<(usize, bool), BridgeError> {
        if stack.is_empty() {
            return Ok((0, false));
        }
        let run_id = job.run_id.as_deref().ok_or(BridgeError::MissingRunId)?;

        let mut released = 0;
        let mut resumed = false;

        while let Some(top) = stack.peek() {
            let barrier_id = top.barrier_id.clone();
            if !self.engine.barrier(&barrier_id).arrive(Some(&job.jid)).await? {
                tracing::debug!(barrier_id = %barrier_id, "waiting on sibling branches");
                break;
            }
            released += 1;

            let Some(continuation) = stack.pop() else {
                break;
            };
            tracing::debug!(
                barrier_id = %barrier_id,
                propagate = continuation.propagate,
                "barrier released"
            );

            if let Some(remaining) = &continuation.remaining {
                self.engine.reduce(remaining, run_id, 0, stack.clone()).await?;
                resumed = true;
            }
            if !continuation.propagate {
                break;
            }
        }

        Ok((released, resumed))
    }
}
