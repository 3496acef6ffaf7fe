//! Job payload types.
//!
//! A [`JobPayload`] is what the engine hands to the job queue for every task
//! leaf. Besides the task itself it carries the run identity and, when the
//! job is part of a larger DAG, a reference to the continuation stack.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::workflow::TaskSpec;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Payload key identifying the workflow run.
pub const OPTION_KEY_RUN_ID: &str = "workflow_run_id";

/// Payload key holding the continuation reference.
pub const OPTION_KEY_CONTINUATIONS: &str = "workflow_continuations";

/// Payload option key for the retry policy.
pub const OPTION_KEY_RETRY: &str = "retry";

/// Payload option key for the queue name.
pub const OPTION_KEY_QUEUE: &str = "queue";

/// Built-in target used to carry continuations past empty chains and groups.
pub const NOOP_TARGET: &str = "weft.noop";

/// Queue used when a task does not name one.
pub const DEFAULT_QUEUE: &str = "default";

fn first_attempt() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// JobPayload
// ---------------------------------------------------------------------------

/// A job as handed to the queue and, later, to the runtime bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Job id; stable across redeliveries and retries of the same job.
    pub jid: String,
    /// Registered task identifier.
    #[serde(rename = "class")]
    pub target: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Workflow run this job belongs to.
    #[serde(rename = "workflow_run_id", default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Opaque continuation reference (see continuation storage in weft-core).
    #[serde(
        rename = "workflow_continuations",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub continuations: Option<Value>,
    /// 1-based attempt counter, bumped by the queue on retry.
    #[serde(default = "first_attempt")]
    pub attempt: u32,
    /// Remaining task options (queue, retry, ...).
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl JobPayload {
    /// Build a fresh payload (new `jid`, first attempt) for a task.
    pub fn for_task(task: &TaskSpec) -> Self {
        Self {
            jid: Uuid::now_v7().to_string(),
            target: task.target.clone(),
            args: task.args.clone(),
            run_id: None,
            continuations: None,
            attempt: 1,
            options: task.options.clone(),
        }
    }

    /// Queue name from the `queue` option.
    pub fn queue_name(&self) -> &str {
        self.options
            .get(OPTION_KEY_QUEUE)
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_QUEUE)
    }

    /// Retry budget from the `retry` option.
    ///
    /// A number is taken as-is, `false` means no retries, `true` or a missing
    /// option means "use the queue default" (`None`).
    pub fn max_retries(&self) -> Option<u32> {
        match self.options.get(OPTION_KEY_RETRY) {
            Some(Value::Bool(false)) => Some(0),
            Some(Value::Number(n)) => n.as_u64().map(|n| n.min(u32::MAX as u64) as u32),
            _ => None,
        }
    }

    /// The same job, scheduled for its next attempt.
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.attempt = self.attempt.saturating_add(1);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_wire_keys() {
        let task = TaskSpec::new("index_doc")
            .with_args(vec![json!("doc-1")])
            .with_option("queue", json!("low"));
        let mut job = JobPayload::for_task(&task);
        job.run_id = Some("run-1".to_string());
        job.continuations = Some(json!([]));

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["class"], "index_doc");
        assert_eq!(value["args"], json!(["doc-1"]));
        assert_eq!(value[OPTION_KEY_RUN_ID], "run-1");
        assert_eq!(value[OPTION_KEY_CONTINUATIONS], json!([]));
        assert_eq!(value["queue"], "low");
        assert_eq!(value["attempt"], 1);

        let parsed: JobPayload = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, job);
    }

    #[test]
    fn test_payload_omits_absent_workflow_keys() {
        let job = JobPayload::for_task(&TaskSpec::new("a"));
        let value = serde_json::to_value(&job).unwrap();
        assert!(value.get(OPTION_KEY_RUN_ID).is_none());
        assert!(value.get(OPTION_KEY_CONTINUATIONS).is_none());
    }

    #[test]
    fn test_fresh_jids_are_unique() {
        let task = TaskSpec::new("a");
        assert_ne!(JobPayload::for_task(&task).jid, JobPayload::for_task(&task).jid);
    }

    #[test]
    fn test_retry_option_parsing() {
        let base = TaskSpec::new("a");
        assert_eq!(JobPayload::for_task(&base).max_retries(), None);

        let job = JobPayload::for_task(&base.clone().with_option("retry", json!(3)));
        assert_eq!(job.max_retries(), Some(3));

        let job = JobPayload::for_task(&base.clone().with_option("retry", json!(false)));
        assert_eq!(job.max_retries(), Some(0));

        let job = JobPayload::for_task(&base.with_option("retry", json!(true)));
        assert_eq!(job.max_retries(), None);
    }

    #[test]
    fn test_next_attempt_keeps_jid() {
        let job = JobPayload::for_task(&TaskSpec::new("a"));
        let retry = job.next_attempt();
        assert_eq!(retry.jid, job.jid);
        assert_eq!(retry.attempt, 2);
        assert_eq!(job.queue_name(), DEFAULT_QUEUE);
    }
}
