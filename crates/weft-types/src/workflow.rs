//! Workflow model types.
//!
//! A workflow is a tree of [`WorkflowNode`] values: single task invocations
//! composed into sequential chains, parallel groups and delayed steps. Nodes
//! are plain values with structural equality; the engine never mutates them.
//!
//! The serde representation is the persisted wire shape used inside job
//! payloads:
//!
//! ```json
//! {"__type__": "job", "class": "send_email", "args": [1], "queue": "mail"}
//! {"__type__": "chain", "children": [...]}
//! {"__type__": "group", "children": [...]}
//! {"__type__": "with_delay", "delay": 1500, "task": {...}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorkflowError;

/// Keys that carry node or job fields on the wire and therefore cannot be
/// used as task options.
pub const RESERVED_OPTION_KEYS: [&str; 7] = [
    "__type__",
    "class",
    "args",
    "jid",
    "attempt",
    "workflow_run_id",
    "workflow_continuations",
];

/// Longest total delay a task may accumulate through nested delays (100 years).
pub const MAX_DELAY_MS: u64 = 100 * 365 * 24 * 60 * 60 * 1000;

// ---------------------------------------------------------------------------
// TaskSpec
// ---------------------------------------------------------------------------

/// A unit of work: a target identifier, positional arguments and free-form
/// execution options (queue name, retry policy, ...).
///
/// Options are opaque to the engine and are flattened next to `class` and
/// `args` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Registered task identifier.
    #[serde(rename = "class")]
    pub target: String,
    /// Positional arguments (JSON-native values only).
    #[serde(default)]
    pub args: Vec<Value>,
    /// Execution options forwarded to the job queue.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl TaskSpec {
    /// Create a task with no arguments and no options.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            args: Vec::new(),
            options: Map::new(),
        }
    }

    /// Replace the argument list.
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Set a single execution option.
    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

impl fmt::Display for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({}", self.target)?;
        if !self.args.is_empty() {
            let args = Value::Array(self.args.clone());
            write!(f, ", {args}")?;
        }
        write!(f, ")")
    }
}

// ---------------------------------------------------------------------------
// WorkflowNode
// ---------------------------------------------------------------------------

/// A node of a workflow DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__type__")]
pub enum WorkflowNode {
    /// A single task invocation.
    #[serde(rename = "job")]
    Task(TaskSpec),

    /// Children run strictly in order. An empty chain is a no-op.
    #[serde(rename = "chain")]
    Chain { children: Vec<WorkflowNode> },

    /// Children run concurrently; the group completes when every child's
    /// sub-DAG completes. An empty group is a no-op.
    #[serde(rename = "group")]
    Group { children: Vec<WorkflowNode> },

    /// Defers the first enqueue of `inner` by `delay_ms` milliseconds.
    /// Nested delays add up.
    #[serde(rename = "with_delay")]
    Delayed {
        #[serde(rename = "task")]
        inner: Box<WorkflowNode>,
        #[serde(rename = "delay")]
        delay_ms: u64,
    },
}

impl WorkflowNode {
    /// A task node with the given target and positional arguments.
    pub fn task(target: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Task(TaskSpec::new(target).with_args(args))
    }

    /// A sequential chain of nodes.
    pub fn chain(children: impl IntoIterator<Item = WorkflowNode>) -> Self {
        Self::Chain {
            children: children.into_iter().collect(),
        }
    }

    /// A parallel group of nodes.
    pub fn group(children: impl IntoIterator<Item = WorkflowNode>) -> Self {
        Self::Group {
            children: children.into_iter().collect(),
        }
    }

    /// Wrap `inner` so its first enqueue is deferred by `delay_ms`.
    pub fn delayed(inner: WorkflowNode, delay_ms: u64) -> Self {
        Self::Delayed {
            inner: Box::new(inner),
            delay_ms,
        }
    }

    /// Combinator form of [`WorkflowNode::delayed`].
    pub fn with_delay(self, delay_ms: u64) -> Self {
        Self::delayed(self, delay_ms)
    }

    /// Check construction invariants for the whole tree: non-empty task
    /// targets, no reserved option keys and accumulated delays no longer than
    /// [`MAX_DELAY_MS`].
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut pending = vec![(self, 0u64)];
        while let Some((node, delay_ms)) = pending.pop() {
            match node {
                WorkflowNode::Task(spec) => {
                    if spec.target.trim().is_empty() {
                        return Err(WorkflowError::EmptyTarget);
                    }
                    if let Some(key) = RESERVED_OPTION_KEYS
                        .iter()
                        .find(|key| spec.options.contains_key(**key))
                    {
                        return Err(WorkflowError::ReservedOption {
                            target: spec.target.clone(),
                            key: key.to_string(),
                        });
                    }
                }
                WorkflowNode::Chain { children } | WorkflowNode::Group { children } => {
                    pending.extend(children.iter().map(|child| (child, delay_ms)));
                }
                WorkflowNode::Delayed { inner, delay_ms: extra } => {
                    let total = delay_ms.saturating_add(*extra);
                    if total > MAX_DELAY_MS {
                        return Err(WorkflowError::DelayOutOfRange { delay_ms: total });
                    }
                    pending.push((inner.as_ref(), total));
                }
            }
        }
        Ok(())
    }

    /// Number of task leaves in the tree.
    pub fn task_count(&self) -> usize {
        match self {
            WorkflowNode::Task(_) => 1,
            WorkflowNode::Chain { children } | WorkflowNode::Group { children } => {
                children.iter().map(WorkflowNode::task_count).sum()
            }
            WorkflowNode::Delayed { inner, .. } => inner.task_count(),
        }
    }

    /// Nesting depth; a lone task has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            WorkflowNode::Task(_) => 1,
            WorkflowNode::Chain { children } | WorkflowNode::Group { children } => {
                1 + children.iter().map(WorkflowNode::depth).max().unwrap_or(0)
            }
            WorkflowNode::Delayed { inner, .. } => 1 + inner.depth(),
        }
    }

    /// Short name of the node kind, matching the wire tag.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowNode::Task(_) => "job",
            WorkflowNode::Chain { .. } => "chain",
            WorkflowNode::Group { .. } => "group",
            WorkflowNode::Delayed { .. } => "with_delay",
        }
    }
}

impl From<TaskSpec> for WorkflowNode {
    fn from(spec: TaskSpec) -> Self {
        WorkflowNode::Task(spec)
    }
}

impl fmt::Display for WorkflowNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, name: &str, children: &[WorkflowNode]) -> fmt::Result {
            write!(f, "{name}(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{child}")?;
            }
            write!(f, ")")
        }

        match self {
            WorkflowNode::Task(spec) => write!(f, "{spec}"),
            WorkflowNode::Chain { children } => list(f, "Chain", children),
            WorkflowNode::Group { children } => list(f, "Group", children),
            WorkflowNode::Delayed { inner, delay_ms } => write!(f, "Delayed({inner}, {delay_ms}ms)"),
        }
    }
}
