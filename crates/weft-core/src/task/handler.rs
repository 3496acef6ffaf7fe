//! Task handler trait.
//!
//! Follows the same pattern as `WorkflowMemory`:
//! 1. `TaskHandler` uses RPITIT for the async `execute`
//! 2. `TaskHandlerDyn` is the object-safe twin stored in the registry
//! 3. A blanket impl bridges the two

use std::future::Future;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use crate::storage::memory::MemoryError;
use crate::workflow::context::JobContext;
use crate::workflow::engine::EngineError;

/// What a task body returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TaskOutput {
    /// Nothing to persist.
    #[default]
    Empty,
    /// Named output fields, persisted to workflow memory when enabled.
    Fields(Map<String, Value>),
}

impl TaskOutput {
    pub fn fields(&self) -> Option<&Map<String, Value>> {
        match self {
            TaskOutput::Fields(fields) if !fields.is_empty() => Some(fields),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_none()
    }

    /// JSON form: the field map, or `null`.
    pub fn to_value(&self) -> Value {
        match self {
            TaskOutput::Empty => Value::Null,
            TaskOutput::Fields(fields) => Value::Object(fields.clone()),
        }
    }
}

impl From<Map<String, Value>> for TaskOutput {
    fn from(fields: Map<String, Value>) -> Self {
        TaskOutput::Fields(fields)
    }
}

/// Errors raised by task bodies.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("invalid task input: {0}")]
    InvalidInput(String),

    #[error("invalid task output: {0}")]
    InvalidOutput(String),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("barrier lease failed: {0}")]
    Lease(#[from] EngineError),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }

    /// Input and output contract violations never succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::Failed(_) => true,
            TaskError::InvalidInput(_) | TaskError::InvalidOutput(_) => false,
            TaskError::Memory(MemoryError::MissingRunId) => false,
            TaskError::Memory(MemoryError::Store(_)) => true,
            TaskError::Lease(e) => e.is_retryable(),
        }
    }
}

/// A unit of work registered under a target name.
pub trait TaskHandler: Send + Sync {
    fn execute(
        &self,
        ctx: &JobContext,
        args: &[Value],
    ) -> impl Future<Output = Result<TaskOutput, TaskError>> + Send;
}

/// Object-safe version of [`TaskHandler`].
pub trait TaskHandlerDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a JobContext,
        args: &'a [Value],
    ) -> BoxFuture<'a, Result<TaskOutput, TaskError>>;
}

impl<T: TaskHandler> TaskHandlerDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a JobContext,
        args: &'a [Value],
    ) -> BoxFuture<'a, Result<TaskOutput, TaskError>> {
        Box::pin(self.execute(ctx, args))
    }
}

/// Adapts a closure over the argument list into a handler.
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutput, TaskError>> + Send,
{
    fn execute(
        &self,
        _ctx: &JobContext,
        args: &[Value],
    ) -> impl Future<Output = Result<TaskOutput, TaskError>> + Send {
        (self.f)(args.to_vec())
    }
}

/// The built-in no-op that carries continuations past empty chains and groups.
pub struct NoopTask;

impl TaskHandler for NoopTask {
    async fn execute(&self, _ctx: &JobContext, _args: &[Value]) -> Result<TaskOutput, TaskError> {
        Ok(TaskOutput::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_handler_receives_args() {
        let handler = FnHandler::new(|args: Vec<Value>| async move {
            let mut fields = Map::new();
            fields.insert("n".into(), json!(args.len()));
            Ok::<_, TaskError>(TaskOutput::from(fields))
        });
        let ctx = JobContext::detached("count");
        let output = handler.execute(&ctx, &[json!(1), json!(2)]).await.unwrap();
        assert_eq!(output.to_value(), json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_dyn_dispatch() {
        let handler: Box<dyn TaskHandlerDyn> = Box::new(NoopTask);
        let ctx = JobContext::detached("weft.noop");
        let output = handler.execute_boxed(&ctx, &[]).await.unwrap();
        assert!(output.is_empty());
        assert_eq!(output.to_value(), Value::Null);
    }

    #[test]
    fn test_empty_fields_count_as_empty() {
        assert!(TaskOutput::Fields(Map::new()).is_empty());
        assert!(TaskOutput::Fields(Map::new()).fields().is_none());
    }

    #[test]
    fn test_retryability() {
        assert!(TaskError::failed("boom").is_retryable());
        assert!(!TaskError::InvalidInput("x".into()).is_retryable());
        assert!(!TaskError::InvalidOutput("x".into()).is_retryable());
        assert!(!TaskError::Memory(MemoryError::MissingRunId).is_retryable());
    }
}
