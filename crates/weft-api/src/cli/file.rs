//! Workflow file loading.
//!
//! Files hold the persisted node shape (`__type__` tags). YAML is accepted
//! for `.yaml`/`.yml` files and converted to JSON before decoding, so shape
//! errors report the same `$.children[i]` paths for both formats.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use weft_core::workflow::codec::decode_node;
use weft_types::workflow::WorkflowNode;

/// Parse workflow text. `yaml` selects the YAML parser.
pub fn parse_workflow(content: &str, yaml: bool) -> Result<WorkflowNode> {
    let value: Value = if yaml {
        serde_yaml_ng::from_str(content).context("Failed to parse workflow YAML")?
    } else {
        serde_json::from_str(content).context("Failed to parse workflow JSON")?
    };
    decode_node(&value).context("Invalid workflow")
}

/// Load a workflow from a `.json`, `.yaml` or `.yml` file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowNode> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );
    parse_workflow(&content, yaml).with_context(|| format!("Failed to load {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const YAML_FLOW: &str = r#"
__type__: chain
children:
  - __type__: job
    class: echo
    args: [start]
  - __type__: with_delay
    delay: 250
    task:
      __type__: group
      children:
        - {__type__: job, class: sleep, args: [10]}
        - {__type__: job, class: log, args: [hi], queue: low}
"#;

    #[test]
    fn test_parse_yaml_workflow() {
        let node = parse_workflow(YAML_FLOW, true).unwrap();
        assert_eq!(node.kind(), "chain");
        assert_eq!(node.task_count(), 3);
        assert_eq!(node.depth(), 4);
    }

    #[test]
    fn test_parse_json_workflow() {
        let text = json!({"__type__": "job", "class": "echo", "args": [1]}).to_string();
        let node = parse_workflow(&text, false).unwrap();
        assert_eq!(node, WorkflowNode::task("echo", vec![json!(1)]));
    }

    #[test]
    fn test_unknown_kind_reports_path() {
        let text = json!({"__type__": "chain", "children": [{"__type__": "loop"}]}).to_string();
        let err = parse_workflow(&text, false).unwrap_err();
        assert!(format!("{err:#}").contains("$.children[0]"));
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.yml");
        std::fs::write(&path, YAML_FLOW).unwrap();
        assert_eq!(load_workflow_file(&path).unwrap().task_count(), 3);

        let missing = dir.path().join("missing.json");
        assert!(load_workflow_file(&missing).is_err());
    }
}
