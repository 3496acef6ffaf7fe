//! Run engine.
//!
//! Reduces a workflow tree into queue enqueues. Only the jobs that can start
//! right away are enqueued; everything downstream is captured as a
//! continuation, gated by a completion barrier, and carried inside the
//! payloads of the jobs it depends on.
//!
//! Reduction rules:
//!
//! - `Task` enqueues one job carrying the run id and the current stack.
//! - `Chain [c0, rest..]` creates a 1-party barrier, pushes
//!   `(barrier, Chain(rest), propagate = false)` and reduces `c0` alone.
//! - `Group [c0..cn]` creates an N-party barrier, pushes
//!   `(barrier, None, propagate = true)` and reduces every child with the
//!   same stack.
//! - `Delayed` adds its delay and reduces the inner node.
//! - Empty chains and groups enqueue the built-in no-op so pending
//!   continuations still resolve.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde_json::json;
use uuid::Uuid;
use weft_types::config::WeftConfig;
use weft_types::continuation::{Continuation, ContinuationStack};
use weft_types::error::{QueueError, WorkflowError};
use weft_types::job::{JobPayload, NOOP_TARGET, OPTION_KEY_RETRY};
use weft_types::workflow::{TaskSpec, WorkflowNode};

use super::barrier::{BarrierError, BarrierSettings, CompletionBarrier};
use super::continuation::{ContinuationError, ContinuationStorage};
use crate::queue::JobQueue;
use crate::storage::store::SharedStore;

/// Errors from reducing a workflow.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid workflow: {0}")]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Barrier(#[from] BarrierError),

    #[error(transparent)]
    Continuation(#[from] ContinuationError),

    #[error("enqueue failed: {0}")]
    Queue(#[from] QueueError),
}

impl EngineError {
    /// Whether re-running the job that triggered this reduction can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Workflow(_) => false,
            EngineError::Barrier(BarrierError::Store(_)) => true,
            EngineError::Barrier(_) => false,
            EngineError::Continuation(ContinuationError::Codec(_)) => false,
            EngineError::Continuation(_) => true,
            EngineError::Queue(_) => true,
        }
    }
}

/// Barrier layout and continuation storage used by an engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineSettings {
    pub barrier: BarrierSettings,
    pub continuations: ContinuationStorage,
}

impl EngineSettings {
    pub fn from_config(config: &WeftConfig) -> Self {
        Self {
            barrier: BarrierSettings::from(&config.barrier),
            continuations: ContinuationStorage::from_config(&config.continuations),
        }
    }
}

/// One pending reduction step.
struct Step<'n> {
    node: &'n WorkflowNode,
    delay_ms: u64,
    stack: ContinuationStack,
}

/// The workflow engine: a shared store for barriers plus a queue to enqueue into.
pub struct RunEngine<S: SharedStore, Q: JobQueue> {
    store: Arc<S>,
    queue: Q,
    settings: EngineSettings,
}

impl<S: SharedStore, Q: JobQueue> RunEngine<S, Q> {
    pub fn new(store: Arc<S>, queue: Q, settings: EngineSettings) -> Self {
        Self {
            store,
            queue,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Handle to the barrier with the given id.
    pub fn barrier(&self, id: &str) -> CompletionBarrier<'_, S> {
        CompletionBarrier::new(self.store.as_ref(), id, &self.settings.barrier)
    }

    /// Start a new run of `node` and return its run id.
    ///
    /// Never waits for the workflow: completion is observable only through
    /// task side effects, workflow memory or the queue.
    pub async fn run(&self, node: &WorkflowNode) -> Result<String, EngineError> {
        let run_id = Uuid::now_v7().to_string();
        self.run_with_id(node, &run_id).await?;
        Ok(run_id)
    }

    /// Start a run of `node` under a caller-chosen run id.
    pub async fn run_with_id(&self, node: &WorkflowNode, run_id: &str) -> Result<Vec<String>, EngineError> {
        node.validate()?;
        let jids = self
            .reduce(node, run_id, 0, ContinuationStack::new())
            .await?;
        tracing::info!(
            run_id,
            tasks = node.task_count(),
            enqueued = jids.len(),
            "workflow started"
        );
        Ok(jids)
    }

    /// Reduce `node` under `run_id`, returning the ids of the jobs enqueued.
    ///
    /// `stack` holds the continuations already pending above `node`; it is
    /// handed unchanged to every job this reduction produces, augmented with
    /// whatever barriers `node` itself introduces.
    pub async fn reduce(
        &self,
        node: &WorkflowNode,
        run_id: &str,
        delay_ms: u64,
        stack: ContinuationStack,
    ) -> Result<Vec<String>, EngineError> {
        tracing::debug!(run_id, delay_ms, depth = stack.len(), node = %node, "reducing workflow");

        let mut jids = Vec::new();
        let mut pending = vec![Step {
            node,
            delay_ms,
            stack,
        }];

        while let Some(Step {
            node,
            delay_ms,
            stack,
        }) = pending.pop()
        {
            match node {
                WorkflowNode::Task(spec) => {
                    jids.push(self.enqueue_task(spec, run_id, delay_ms, &stack).await?);
                }

                WorkflowNode::Chain { children } => match children.as_slice() {
                    [] => jids.push(self.enqueue_noop(run_id, delay_ms, &stack).await?),
                    [only] => pending.push(Step {
                        node: only,
                        delay_ms,
                        stack,
                    }),
                    [first, rest @ ..] => {
                        let barrier_id = self.create_barrier(run_id, 1).await?;
                        let tail = WorkflowNode::chain(rest.iter().cloned());
                        pending.push(Step {
                            node: first,
                            delay_ms,
                            stack: stack.pushed(Continuation::chain_tail(barrier_id, tail)),
                        });
                    }
                },

                WorkflowNode::Group { children } => {
                    if children.is_empty() {
                        jids.push(self.enqueue_noop(run_id, delay_ms, &stack).await?);
                        continue;
                    }
                    let parties = u32::try_from(children.len()).unwrap_or(u32::MAX);
                    let barrier_id = self.create_barrier(run_id, parties).await?;
                    let stack = stack.pushed(Continuation::group_join(barrier_id));
                    // Reversed so the work-list pops children in listed order.
                    for child in children.iter().rev() {
                        pending.push(Step {
                            node: child,
                            delay_ms,
                            stack: stack.clone(),
                        });
                    }
                }

                WorkflowNode::Delayed { inner, delay_ms: extra } => pending.push(Step {
                    node: inner,
                    delay_ms: delay_ms.saturating_add(*extra),
                    stack,
                }),
            }
        }

        Ok(jids)
    }

    /// Refresh the TTL of every barrier named in `stack`.
    /// Returns how many barriers still existed.
    pub async fn extend_ttl(&self, stack: &ContinuationStack, ttl: Duration) -> Result<usize, EngineError> {
        let mut refreshed = 0;
        for id in stack.barrier_ids() {
            if self.barrier(id).extend_ttl(ttl).await? {
                refreshed += 1;
            }
        }
        tracing::debug!(barriers = stack.len(), refreshed, ttl_secs = ttl.as_secs(), "extended barrier ttl");
        Ok(refreshed)
    }

    // ----- Internals -----

    async fn create_barrier(&self, run_id: &str, parties: u32) -> Result<String, EngineError> {
        let barrier_id = Uuid::now_v7().to_string();
        self.barrier(&barrier_id).create(parties).await?;
        tracing::debug!(run_id, barrier_id = %barrier_id, parties, "barrier created");
        Ok(barrier_id)
    }

    async fn enqueue_task(
        &self,
        spec: &TaskSpec,
        run_id: &str,
        delay_ms: u64,
        stack: &ContinuationStack,
    ) -> Result<String, EngineError> {
        let at = if delay_ms > 0 {
            let out_of_range = || WorkflowError::DelayOutOfRange { delay_ms };
            let delay = i64::try_from(delay_ms)
                .ok()
                .and_then(TimeDelta::try_milliseconds)
                .ok_or_else(out_of_range)?;
            Some(Utc::now().checked_add_signed(delay).ok_or_else(out_of_range)?)
        } else {
            None
        };

        let mut job = JobPayload::for_task(spec);
        job.run_id = Some(run_id.to_string());
        if !stack.is_empty() {
            let reference = self
                .settings
                .continuations
                .store(self.store.as_ref(), stack)
                .await?;
            job.continuations = Some(reference);
        }

        let target = job.target.clone();
        let jid = self.queue.enqueue(job, at).await?;
        tracing::debug!(
            run_id,
            jid = %jid,
            target = %target,
            delay_ms,
            continuations = stack.len(),
            "enqueued job"
        );
        Ok(jid)
    }

    async fn enqueue_noop(
        &self,
        run_id: &str,
        delay_ms: u64,
        stack: &ContinuationStack,
    ) -> Result<String, EngineError> {
        let noop = TaskSpec::new(NOOP_TARGET).with_option(OPTION_KEY_RETRY, json!(0));
        self.enqueue_task(&noop, run_id, delay_ms, stack).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockStore, RecordingQueue};
    use crate::workflow::codec;
    use serde_json::json;

    fn engine() -> RunEngine<MockStore, RecordingQueue> {
        RunEngine::new(
            Arc::new(MockStore::new()),
            RecordingQueue::new(),
            EngineSettings::default(),
        )
    }

    fn t(name: &str) -> WorkflowNode {
        WorkflowNode::task(name, vec![])
    }

    fn stack_of(job: &JobPayload) -> ContinuationStack {
        job.continuations
            .as_ref()
            .map(|v| codec::decode_stack(v).unwrap())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_single_task_enqueued_with_run_id() {
        let engine = engine();
        let run_id = engine
            .run(&WorkflowNode::task("a", vec![json!(1)]))
            .await
            .unwrap();

        let jobs = engine.queue().jobs();
        assert_eq!(jobs.len(), 1);
        let (job, at) = &jobs[0];
        assert_eq!(job.target, "a");
        assert_eq!(job.args, vec![json!(1)]);
        assert_eq!(job.run_id.as_deref(), Some(run_id.as_str()));
        assert!(job.continuations.is_none());
        assert!(at.is_none());
    }

    #[tokio::test]
    async fn test_chain_enqueues_only_first_child() {
        let engine = engine();
        engine
            .run(&WorkflowNode::chain([t("a"), t("b"), t("c")]))
            .await
            .unwrap();

        let jobs = engine.queue().jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].0.target, "a");

        let stack = stack_of(&jobs[0].0);
        assert_eq!(stack.len(), 1);
        let top = stack.peek().unwrap();
        assert!(!top.propagate);
        assert_eq!(top.remaining, Some(WorkflowNode::chain([t("b"), t("c")])));
        assert_eq!(engine.barrier(&top.barrier_id).remaining().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_single_child_chain_needs_no_barrier() {
        let engine = engine();
        engine.run(&WorkflowNode::chain([t("only")])).await.unwrap();

        let jobs = engine.queue().jobs();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].0.continuations.is_none());
        assert!(engine.store().is_empty());
    }

    #[tokio::test]
    async fn test_group_enqueues_all_children_sharing_one_barrier() {
        let engine = engine();
        engine
            .run(&WorkflowNode::group([t("a"), t("b"), t("c")]))
            .await
            .unwrap();

        let jobs = engine.queue().jobs();
        let targets: Vec<_> = jobs.iter().map(|(j, _)| j.target.as_str()).collect();
        assert_eq!(targets, vec!["a", "b", "c"]);

        let stacks: Vec<_> = jobs.iter().map(|(j, _)| stack_of(j)).collect();
        assert!(stacks.iter().all(|s| s == &stacks[0]));
        let top = stacks[0].peek().unwrap();
        assert!(top.propagate);
        assert!(top.remaining.is_none());
        assert_eq!(engine.barrier(&top.barrier_id).remaining().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_group_inside_chain_nests_continuations() {
        let engine = engine();
        engine
            .run(&WorkflowNode::group([
                WorkflowNode::chain([t("a"), t("b")]),
                t("c"),
            ]))
            .await
            .unwrap();

        let jobs = engine.queue().jobs();
        assert_eq!(jobs.len(), 2);
        let a = stack_of(&jobs[0].0);
        let c = stack_of(&jobs[1].0);
        assert_eq!(a.len(), 2);
        assert_eq!(c.len(), 1);
        // The chain continuation sits on top of the group join.
        assert_eq!(a.iter().next(), c.peek());
        assert_eq!(a.peek().unwrap().remaining, Some(WorkflowNode::chain([t("b")])));
    }

    #[tokio::test]
    async fn test_nested_delays_add_up() {
        let engine = engine();
        let before = Utc::now();
        engine
            .run(&t("a").with_delay(100).with_delay(50))
            .await
            .unwrap();
        let after = Utc::now();

        let jobs = engine.queue().jobs();
        let at = jobs[0].1.unwrap();
        assert!(at >= before + TimeDelta::milliseconds(150));
        assert!(at <= after + TimeDelta::milliseconds(150));
    }

    #[tokio::test]
    async fn test_delay_applies_to_every_group_child() {
        let engine = engine();
        engine
            .run(&WorkflowNode::group([t("a"), t("b").with_delay(10)]).with_delay(20))
            .await
            .unwrap();

        let jobs = engine.queue().jobs();
        let (a_at, b_at) = (jobs[0].1.unwrap(), jobs[1].1.unwrap());
        let gap = b_at - a_at;
        assert!(gap >= TimeDelta::milliseconds(5) && gap <= TimeDelta::milliseconds(15));
    }

    #[tokio::test]
    async fn test_empty_group_enqueues_noop_carrying_stack() {
        let engine = engine();
        engine
            .run(&WorkflowNode::chain([WorkflowNode::group([]), t("after")]))
            .await
            .unwrap();

        let jobs = engine.queue().jobs();
        assert_eq!(jobs.len(), 1);
        let noop = &jobs[0].0;
        assert_eq!(noop.target, NOOP_TARGET);
        assert_eq!(noop.max_retries(), Some(0));
        assert_eq!(
            stack_of(noop).peek().unwrap().remaining,
            Some(WorkflowNode::chain([t("after")]))
        );
    }

    #[tokio::test]
    async fn test_top_level_empty_chain_still_enqueues_noop() {
        let engine = engine();
        engine.run(&WorkflowNode::chain([])).await.unwrap();
        let jobs = engine.queue().jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].0.target, NOOP_TARGET);
        assert!(jobs[0].0.continuations.is_none());
    }

    #[tokio::test]
    async fn test_invalid_workflow_rejected_before_enqueue() {
        let engine = engine();
        let err = engine
            .run(&WorkflowNode::chain([t("a"), t("")]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Workflow(_)));
        assert!(!err.is_retryable());
        assert!(engine.queue().jobs().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_delay_rejected_before_enqueue() {
        let engine = engine();
        let node = codec::decode_node(&json!({
            "__type__": "with_delay",
            "delay": 10_000_000_000_000_000u64,
            "task": {"__type__": "job", "class": "a"}
        }));
        assert!(node.is_err());

        let node = WorkflowNode::group([t("a"), t("b").with_delay(u64::MAX)]);
        let err = engine.run(&node).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Workflow(WorkflowError::DelayOutOfRange { .. })
        ));
        assert!(!err.is_retryable());
        assert!(engine.queue().jobs().is_empty());
        assert!(engine.store().is_empty());
    }

    #[tokio::test]
    async fn test_reduce_with_unschedulable_delay_fails_without_enqueue() {
        let engine = engine();
        let err = engine
            .reduce(&t("a"), "run", u64::MAX, ContinuationStack::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Workflow(WorkflowError::DelayOutOfRange { delay_ms: u64::MAX })
        ));
        assert!(engine.queue().jobs().is_empty());
    }

    #[tokio::test]
    async fn test_queue_failure_propagates() {
        let engine = engine();
        engine.queue().fail_next();
        let err = engine.run(&t("a")).await.unwrap_err();
        assert!(matches!(err, EngineError::Queue(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_external_continuations_embed_reference() {
        let engine = RunEngine::new(
            Arc::new(MockStore::new()),
            RecordingQueue::new(),
            EngineSettings {
                continuations: ContinuationStorage::External {
                    ttl: Duration::from_secs(60),
                },
                ..EngineSettings::default()
            },
        );
        engine
            .run(&WorkflowNode::chain([t("a"), t("b")]))
            .await
            .unwrap();

        let jobs = engine.queue().jobs();
        let reference = jobs[0].0.continuations.clone().unwrap();
        assert!(reference["ref"].is_string());
        let stack = engine
            .settings()
            .continuations
            .retrieve(engine.store().as_ref(), &reference)
            .await
            .unwrap();
        assert_eq!(stack.len(), 1);
    }

    #[tokio::test]
    async fn test_extend_ttl_counts_live_barriers() {
        let engine = engine();
        engine
            .run(&WorkflowNode::group([WorkflowNode::chain([t("a"), t("b")])]))
            .await
            .unwrap();

        let stack = stack_of(&engine.queue().jobs()[0].0);
        assert_eq!(stack.len(), 2);
        let refreshed = engine
            .extend_ttl(&stack, Duration::from_secs(999))
            .await
            .unwrap();
        assert_eq!(refreshed, 2);

        let key = engine.barrier(&stack.barrier_ids()[0]).key().to_string();
        assert_eq!(
            engine.store().ttl(&key).await.unwrap(),
            Some(Duration::from_secs(999))
        );
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = WeftConfig::default();
        config.barrier.ttl_secs = 10;
        config.continuations.mode = weft_types::config::ContinuationMode::External;
        let settings = EngineSettings::from_config(&config);
        assert_eq!(settings.barrier.ttl, Duration::from_secs(10));
        assert!(matches!(settings.continuations, ContinuationStorage::External { .. }));
    }
}
