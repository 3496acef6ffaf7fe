//! Typed tasks.
//!
//! A [`TypedTask`] declares its input and output as Rust types. The wrapper
//! [`Typed`] turns it into a plain [`TaskHandler`]:
//!
//! - no argument means an empty input object, one object argument is the
//!   input, anything else is rejected;
//! - input fields named in the input type's JSON schema that the caller did
//!   not pass are read from workflow memory (explicit arguments win);
//! - the output must serialize to a JSON object, which becomes the task's
//!   output fields.

use std::future::Future;

use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::handler::{TaskError, TaskHandler, TaskOutput};
use crate::workflow::context::JobContext;

/// A task with a schema-described input and a structured output.
pub trait TypedTask: Send + Sync {
    type Input: DeserializeOwned + JsonSchema + Send;
    type Output: Serialize + Send;

    fn run(
        &self,
        ctx: &JobContext,
        input: Self::Input,
    ) -> impl Future<Output = Result<Self::Output, TaskError>> + Send;
}

/// Adapter registering a [`TypedTask`] as a [`TaskHandler`].
pub struct Typed<T>(pub T);

impl<T: TypedTask> TaskHandler for Typed<T> {
    async fn execute(&self, ctx: &JobContext, args: &[Value]) -> Result<TaskOutput, TaskError> {
        let mut input = explicit_input(args)?;

        let missing: Vec<String> = input_fields::<T::Input>()
            .into_iter()
            .filter(|field| !input.contains_key(field))
            .collect();
        if !missing.is_empty() {
            let hydrated = ctx.hydrate(&missing).await?;
            tracing::trace!(
                target_task = ctx.target(),
                requested = missing.len(),
                hydrated = hydrated.len(),
                "hydrated task input"
            );
            for (key, value) in hydrated {
                input.entry(key).or_insert(value);
            }
        }

        let input: T::Input = serde_json::from_value(Value::Object(input))
            .map_err(|e| TaskError::InvalidInput(e.to_string()))?;
        let output = self.0.run(ctx, input).await?;

        match serde_json::to_value(output) {
            Ok(Value::Object(fields)) => Ok(TaskOutput::Fields(fields)),
            Ok(other) => Err(TaskError::InvalidOutput(format!(
                "expected an object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(TaskError::InvalidOutput(e.to_string())),
        }
    }
}

fn explicit_input(args: &[Value]) -> Result<Map<String, Value>, TaskError> {
    match args {
        [] => Ok(Map::new()),
        [Value::Object(fields)] => Ok(fields.clone()),
        [other] => Err(TaskError::InvalidInput(format!(
            "expected an object argument, got {}",
            json_kind(other)
        ))),
        _ => Err(TaskError::InvalidInput(format!(
            "expected at most one argument, got {}",
            args.len()
        ))),
    }
}

/// Top-level property names declared by the JSON schema of `T`.
pub fn input_fields<T: JsonSchema>() -> Vec<String> {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .ok()
        .and_then(|value| {
            value
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| props.keys().cloned().collect())
        })
        .unwrap_or_default()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde::Deserialize;
    use serde_json::json;
    use weft_types::continuation::ContinuationStack;
    use weft_types::job::JobPayload;
    use weft_types::workflow::TaskSpec;

    use super::*;
    use crate::storage::memory::{BoxMemory, HashMemory};
    use crate::testing::MockStore;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct GreetInput {
        name: String,
        #[serde(default)]
        excited: bool,
    }

    #[derive(Serialize)]
    struct GreetOutput {
        greeting: String,
    }

    struct Greet;

    impl TypedTask for Greet {
        type Input = GreetInput;
        type Output = GreetOutput;

        async fn run(&self, _ctx: &JobContext, input: GreetInput) -> Result<GreetOutput, TaskError> {
            let mark = if input.excited { "!" } else { "." };
            Ok(GreetOutput {
                greeting: format!("hello {}{mark}", input.name),
            })
        }
    }

    #[derive(Deserialize, JsonSchema)]
    struct Nothing {}

    struct Scalar;

    impl TypedTask for Scalar {
        type Input = Nothing;
        type Output = u32;

        async fn run(&self, _ctx: &JobContext, _input: Self::Input) -> Result<u32, TaskError> {
            Ok(7)
        }
    }

    async fn ctx_with_memory(seed: Value) -> JobContext {
        let memory = Arc::new(BoxMemory::new(HashMemory::new(
            Arc::new(MockStore::new()),
            Duration::from_secs(60),
            "m",
        )));
        memory
            .write("run-1", seed.as_object().unwrap())
            .await
            .unwrap();
        let mut job = JobPayload::for_task(&TaskSpec::new("greet"));
        job.run_id = Some("run-1".into());
        JobContext::new(&job, ContinuationStack::new()).with_memory(Some(memory))
    }

    #[test]
    fn test_input_fields_from_schema() {
        let mut fields = input_fields::<GreetInput>();
        fields.sort();
        assert_eq!(fields, vec!["excited", "name"]);
    }

    #[tokio::test]
    async fn test_explicit_argument() {
        let ctx = JobContext::detached("greet");
        let output = Typed(Greet)
            .execute(&ctx, &[json!({"name": "ada", "excited": true})])
            .await
            .unwrap();
        assert_eq!(output.to_value(), json!({"greeting": "hello ada!"}));
    }

    #[tokio::test]
    async fn test_missing_fields_hydrated_from_memory() {
        let ctx = ctx_with_memory(json!({"name": "grace", "unrelated": 1})).await;
        let output = Typed(Greet).execute(&ctx, &[]).await.unwrap();
        assert_eq!(output.to_value(), json!({"greeting": "hello grace."}));
    }

    #[tokio::test]
    async fn test_explicit_arguments_win_over_memory() {
        let ctx = ctx_with_memory(json!({"name": "grace", "excited": true})).await;
        let output = Typed(Greet)
            .execute(&ctx, &[json!({"name": "linus"})])
            .await
            .unwrap();
        assert_eq!(output.to_value(), json!({"greeting": "hello linus!"}));
    }

    #[tokio::test]
    async fn test_invalid_inputs() {
        let ctx = JobContext::detached("greet");
        let err = Typed(Greet).execute(&ctx, &[]).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidInput(_)));

        let err = Typed(Greet).execute(&ctx, &[json!("ada")]).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidInput(msg) if msg.contains("string")));

        let err = Typed(Greet)
            .execute(&ctx, &[json!({}), json!({})])
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_non_object_output_rejected() {
        let ctx = JobContext::detached("scalar");
        let err = Typed(Scalar).execute(&ctx, &[]).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidOutput(msg) if msg.contains("number")));
    }
}
