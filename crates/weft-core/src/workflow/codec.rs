//! Continuation codec.
//!
//! Converts workflow nodes and continuation stacks to and from the plain JSON
//! shape carried inside job payloads. Decoding checks the tagged shape first
//! so malformed input is reported with a JSON path (`$.children[1].task`)
//! instead of serde's generic "data did not match any variant" message.

use serde_json::Value;
use weft_types::continuation::ContinuationStack;
use weft_types::error::WorkflowError;
use weft_types::workflow::WorkflowNode;

/// Errors from encoding or decoding workflow values.
///
/// All of these are construction errors: retrying the job cannot fix them.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("expected an object at {0}")]
    NotAnObject(String),

    #[error("missing field '{field}' at {path}")]
    MissingField { field: &'static str, path: String },

    #[error("unknown node kind '{kind}' at {path}")]
    UnknownKind { kind: String, path: String },

    #[error("malformed workflow value: {0}")]
    Malformed(String),

    #[error(transparent)]
    Invalid(#[from] WorkflowError),
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Malformed(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Encode a node into its tagged wire shape.
pub fn encode_node(node: &WorkflowNode) -> Result<Value, CodecError> {
    node.validate()?;
    Ok(serde_json::to_value(node)?)
}

/// Decode a node from its tagged wire shape.
pub fn decode_node(value: &Value) -> Result<WorkflowNode, CodecError> {
    check_shape(value)?;
    let node: WorkflowNode = serde_json::from_value(value.clone())?;
    node.validate()?;
    Ok(node)
}

/// Decode an optional node; JSON `null` decodes to `None`.
pub fn decode_node_opt(value: &Value) -> Result<Option<WorkflowNode>, CodecError> {
    if value.is_null() {
        return Ok(None);
    }
    decode_node(value).map(Some)
}

/// Walk the tree and report the first structural problem with its path.
fn check_shape(root: &Value) -> Result<(), CodecError> {
    let mut pending = vec![(root, "$".to_string())];

    while let Some((value, path)) = pending.pop() {
        let obj = value
            .as_object()
            .ok_or_else(|| CodecError::NotAnObject(path.clone()))?;

        let kind = obj
            .get("__type__")
            .and_then(Value::as_str)
            .ok_or_else(|| CodecError::MissingField {
                field: "__type__",
                path: path.clone(),
            })?;

        match kind {
            "job" => {
                if !obj.get("class").is_some_and(Value::is_string) {
                    return Err(CodecError::MissingField {
                        field: "class",
                        path,
                    });
                }
            }
            "chain" | "group" => {
                let children = obj
                    .get("children")
                    .and_then(Value::as_array)
                    .ok_or_else(|| CodecError::MissingField {
                        field: "children",
                        path: path.clone(),
                    })?;
                for (i, child) in children.iter().enumerate().rev() {
                    pending.push((child, format!("{path}.children[{i}]")));
                }
            }
            "with_delay" => {
                if !obj.get("delay").is_some_and(Value::is_u64) {
                    return Err(CodecError::MissingField {
                        field: "delay",
                        path,
                    });
                }
                let inner = obj.get("task").ok_or_else(|| CodecError::MissingField {
                    field: "task",
                    path: path.clone(),
                })?;
                pending.push((inner, format!("{path}.task")));
            }
            other => {
                return Err(CodecError::UnknownKind {
                    kind: other.to_string(),
                    path,
                });
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Stacks
// ---------------------------------------------------------------------------

/// Encode a continuation stack as a JSON array, oldest first.
pub fn encode_stack(stack: &ContinuationStack) -> Result<Value, CodecError> {
    Ok(serde_json::to_value(stack)?)
}

/// Decode a continuation stack. `null` decodes to an empty stack.
pub fn decode_stack(value: &Value) -> Result<ContinuationStack, CodecError> {
    if value.is_null() {
        return Ok(ContinuationStack::new());
    }
    let items = value
        .as_array()
        .ok_or_else(|| CodecError::Malformed("continuation stack must be an array".into()))?;

    for (i, item) in items.iter().enumerate() {
        let path = format!("$[{i}]");
        let obj = item
            .as_object()
            .ok_or_else(|| CodecError::NotAnObject(path.clone()))?;
        if !obj.get("barrier_id").is_some_and(Value::is_string) {
            return Err(CodecError::MissingField {
                field: "barrier_id",
                path,
            });
        }
        if let Some(remaining) = obj.get("remaining").filter(|v| !v.is_null()) {
            check_shape(remaining).map_err(|e| prefix_path(e, &format!("{path}.remaining")))?;
        }
    }

    let stack: ContinuationStack = serde_json::from_value(value.clone())?;
    for continuation in stack.iter() {
        if let Some(node) = &continuation.remaining {
            node.validate()?;
        }
    }
    Ok(stack)
}

fn prefix_path(err: CodecError, prefix: &str) -> CodecError {
    let rebase = |path: String| path.replacen('$', prefix, 1);
    match err {
        CodecError::NotAnObject(path) => CodecError::NotAnObject(rebase(path)),
        CodecError::MissingField { field, path } => CodecError::MissingField {
            field,
            path: rebase(path),
        },
        CodecError::UnknownKind { kind, path } => CodecError::UnknownKind {
            kind,
            path: rebase(path),
        },
        other => other,
    }
}
