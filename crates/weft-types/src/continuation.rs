//! Continuation types.
//!
//! A [`Continuation`] says "when barrier `barrier_id` is released, resume
//! `remaining`". The engine pushes one per Chain step (`propagate = false`)
//! and one per Group fan-in (`propagate = true`). A [`ContinuationStack`]
//! travels inside every job payload so a later, independent job can pick up
//! the rest of the workflow.

use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowNode;

/// Deferred "rest of the workflow" gated by a completion barrier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Continuation {
    /// Barrier that must be released before this continuation runs.
    pub barrier_id: String,
    /// Sub-DAG to reduce once the barrier is released.
    #[serde(default)]
    pub remaining: Option<WorkflowNode>,
    /// Whether resolution falls through to the next older continuation.
    pub propagate: bool,
}

impl Continuation {
    /// Continuation for the tail of a chain: runs `remaining`, never propagates.
    pub fn chain_tail(barrier_id: impl Into<String>, remaining: WorkflowNode) -> Self {
        Self {
            barrier_id: barrier_id.into(),
            remaining: Some(remaining),
            propagate: false,
        }
    }

    /// Continuation for a group fan-in: nothing to run, propagates outward.
    pub fn group_join(barrier_id: impl Into<String>) -> Self {
        Self {
            barrier_id: barrier_id.into(),
            remaining: None,
            propagate: true,
        }
    }
}

/// Ordered stack of continuations.
///
/// The most recent continuation is the last element (`peek`/`pop` operate on
/// it). The serialized form is a JSON array, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationStack(Vec<Continuation>);

impl ContinuationStack {
    /// An empty stack.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Return a copy of this stack with `continuation` pushed on top.
    pub fn pushed(&self, continuation: Continuation) -> Self {
        let mut next = self.clone();
        next.push(continuation);
        next
    }

    pub fn push(&mut self, continuation: Continuation) {
        self.0.push(continuation);
    }

    /// The most recent continuation.
    pub fn peek(&self) -> Option<&Continuation> {
        self.0.last()
    }

    pub fn pop(&mut self) -> Option<Continuation> {
        self.0.pop()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Barrier ids of every continuation, oldest first.
    pub fn barrier_ids(&self) -> Vec<&str> {
        self.0.iter().map(|c| c.barrier_id.as_str()).collect()
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Continuation> {
        self.0.iter()
    }
}

impl From<Vec<Continuation>> for ContinuationStack {
    fn from(items: Vec<Continuation>) -> Self {
        Self(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stack_top_is_most_recent() {
        let mut stack = ContinuationStack::new();
        stack.push(Continuation::group_join("outer"));
        stack.push(Continuation::chain_tail("inner", WorkflowNode::task("b", vec![])));

        assert_eq!(stack.peek().unwrap().barrier_id, "inner");
        assert_eq!(stack.pop().unwrap().barrier_id, "inner");
        assert_eq!(stack.peek().unwrap().barrier_id, "outer");
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_pushed_leaves_original_untouched() {
        let base = ContinuationStack::from(vec![Continuation::group_join("g")]);
        let next = base.pushed(Continuation::group_join("h"));
        assert_eq!(base.len(), 1);
        assert_eq!(next.barrier_ids(), vec!["g", "h"]);
    }

    #[test]
    fn test_serialized_as_array_oldest_first() {
        let stack = ContinuationStack::from(vec![
            Continuation::group_join("g"),
            Continuation::chain_tail("c", WorkflowNode::task("b", vec![])),
        ]);
        let value = serde_json::to_value(&stack).unwrap();
        assert_eq!(
            value,
            json!([
                {"barrier_id": "g", "remaining": null, "propagate": true},
                {
                    "barrier_id": "c",
                    "remaining": {"__type__": "job", "class": "b", "args": []},
                    "propagate": false
                }
            ])
        );
    }
}
