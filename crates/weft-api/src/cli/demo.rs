//! Built-in demo tasks and templates for `weft run`.
//!
//! | target  | args                 | output                    |
//! |---------|----------------------|---------------------------|
//! | `echo`  | anything             | `{"echo": [args...]}`     |
//! | `sleep` | `[ms]`               | `{"slept_ms": ms}`        |
//! | `fail`  | `[message?]`         | always fails              |
//! | `log`   | `[message]`          | `{"message": message}`    |

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value, json};
use weft_core::task::handler::{TaskError, TaskHandler, TaskOutput};
use weft_core::task::registry::{RegistryError, TaskRegistry};
use weft_core::template::{TemplateError, TemplateRegistry};
use weft_core::workflow::context::JobContext;
use weft_types::workflow::WorkflowNode;

/// Output fields the demo tasks write to workflow memory.
pub const OUTPUT_FIELDS: [&str; 3] = ["echo", "slept_ms", "message"];

/// One executed job, in completion order.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Execution {
    pub target: String,
    pub args: Vec<Value>,
    pub attempt: u32,
}

/// Collects executions across concurrently running jobs.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    executions: Arc<Mutex<Vec<Execution>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, ctx: &JobContext, args: &[Value]) {
        let execution = Execution {
            target: ctx.target().to_string(),
            args: args.to_vec(),
            attempt: ctx.attempt(),
        };
        match self.executions.lock() {
            Ok(mut executions) => executions.push(execution),
            Err(poisoned) => poisoned.into_inner().push(execution),
        }
    }

    pub fn executions(&self) -> Vec<Execution> {
        match self.executions.lock() {
            Ok(executions) => executions.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

struct Echo(Recorder);

impl TaskHandler for Echo {
    async fn execute(&self, ctx: &JobContext, args: &[Value]) -> Result<TaskOutput, TaskError> {
        self.0.record(ctx, args);
        let mut fields = Map::new();
        fields.insert("echo".to_string(), Value::Array(args.to_vec()));
        Ok(TaskOutput::Fields(fields))
    }
}

struct Sleep(Recorder);

impl TaskHandler for Sleep {
    async fn execute(&self, ctx: &JobContext, args: &[Value]) -> Result<TaskOutput, TaskError> {
        let ms = args
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| TaskError::InvalidInput("sleep expects [milliseconds]".to_string()))?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        self.0.record(ctx, args);
        let mut fields = Map::new();
        fields.insert("slept_ms".to_string(), json!(ms));
        Ok(TaskOutput::Fields(fields))
    }
}

struct Fail(Recorder);

impl TaskHandler for Fail {
    async fn execute(&self, ctx: &JobContext, args: &[Value]) -> Result<TaskOutput, TaskError> {
        self.0.record(ctx, args);
        let message = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or("requested failure");
        Err(TaskError::failed(message))
    }
}

struct Log(Recorder);

impl TaskHandler for Log {
    async fn execute(&self, ctx: &JobContext, args: &[Value]) -> Result<TaskOutput, TaskError> {
        let message = match args.first() {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        tracing::info!(run_id = ctx.run_id().unwrap_or("-"), %message, "log task");
        self.0.record(ctx, args);
        let mut fields = Map::new();
        fields.insert("message".to_string(), Value::String(message));
        Ok(TaskOutput::Fields(fields))
    }
}

/// Registry with the demo targets, all reporting to `recorder`.
pub fn demo_registry(recorder: &Recorder) -> Result<TaskRegistry, RegistryError> {
    let mut registry = TaskRegistry::new();
    registry.register("echo", Echo(recorder.clone()))?;
    registry.register("sleep", Sleep(recorder.clone()))?;
    registry.register("fail", Fail(recorder.clone()))?;
    registry.register("log", Log(recorder.clone()))?;
    Ok(registry)
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

fn defaults(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// `fan-out`: log, then `branches` parallel sleeps, then log.
fn fan_out(params: &Map<String, Value>) -> Result<WorkflowNode, TemplateError> {
    let branches = params
        .get("branches")
        .and_then(Value::as_u64)
        .ok_or_else(|| TemplateError::InvalidParams("branches must be a non-negative integer".to_string()))?;
    let sleep_ms = params.get("sleep_ms").and_then(Value::as_u64).unwrap_or(10);

    Ok(WorkflowNode::chain([
        WorkflowNode::task("log", vec![json!("fan-out started")]),
        WorkflowNode::group((0..branches).map(|_| WorkflowNode::task("sleep", vec![json!(sleep_ms)]))),
        WorkflowNode::task("log", vec![json!("fan-out finished")]),
    ]))
}

/// `pipeline`: one `log` step per entry of `steps`, optionally spaced by
/// `delay_ms`.
fn pipeline(params: &Map<String, Value>) -> Result<WorkflowNode, TemplateError> {
    let steps = params
        .get("steps")
        .and_then(Value::as_array)
        .ok_or_else(|| TemplateError::InvalidParams("steps must be a list".to_string()))?;
    let delay_ms = params.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);

    Ok(WorkflowNode::chain(steps.iter().enumerate().map(|(i, step)| {
        let node = WorkflowNode::task("log", vec![step.clone()]);
        if i > 0 && delay_ms > 0 {
            node.with_delay(delay_ms)
        } else {
            node
        }
    })))
}

/// The built-in templates.
pub fn demo_templates() -> Result<TemplateRegistry, TemplateError> {
    let mut templates = TemplateRegistry::new();
    templates.register("fan-out", defaults(json!({"branches": 3, "sleep_ms": 10})), fan_out)?;
    templates.register(
        "pipeline",
        defaults(json!({"steps": ["extract", "transform", "load"], "delay_ms": 0})),
        pipeline,
    )?;
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::task::handler::TaskHandlerDyn;

    #[test]
    fn test_demo_registry_targets() {
        let registry = demo_registry(&Recorder::new()).unwrap();
        for target in ["echo", "sleep", "fail", "log", "weft.noop"] {
            assert!(registry.contains(target), "missing {target}");
        }
    }

    #[test]
    fn test_fan_out_template() {
        let templates = demo_templates().unwrap();
        let node = templates.build("fan-out", &Map::new()).unwrap();
        assert_eq!(node.task_count(), 5);

        let params = defaults(json!({"branches": 0}));
        assert_eq!(templates.build("fan-out", &params).unwrap().task_count(), 2);

        let bad = defaults(json!({"branches": "many"}));
        assert!(matches!(
            templates.build("fan-out", &bad),
            Err(TemplateError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_pipeline_template_delays_later_steps() {
        let templates = demo_templates().unwrap();
        let params = defaults(json!({"steps": ["a", "b"], "delay_ms": 20}));
        let node = templates.build("pipeline", &params).unwrap();
        let WorkflowNode::Chain { children } = node else {
            panic!("expected chain");
        };
        assert!(matches!(children[0], WorkflowNode::Task(_)));
        assert!(matches!(children[1], WorkflowNode::Delayed { delay_ms: 20, .. }));
    }

    #[tokio::test]
    async fn test_echo_records_and_outputs() {
        let recorder = Recorder::new();
        let registry = demo_registry(&recorder).unwrap();
        let ctx = JobContext::detached("echo");
        let output = registry
            .get("echo")
            .unwrap()
            .execute_boxed(&ctx, &[json!(1), json!("x")])
            .await
            .unwrap();
        assert_eq!(output.to_value(), json!({"echo": [1, "x"]}));
        assert_eq!(recorder.executions()[0].target, "echo");
    }
}
