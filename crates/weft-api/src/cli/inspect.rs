//! `weft validate` and `weft inspect`.

use std::path::Path;

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde::Serialize;
use serde_json::Value;
use weft_types::workflow::WorkflowNode;

use super::file::load_workflow_file;

/// One task leaf as seen by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRow {
    /// JSON path of the leaf inside the file.
    pub path: String,
    pub target: String,
    pub args: Vec<Value>,
    /// Total delay applied to the leaf's first enqueue.
    pub delay_ms: u64,
    pub queue: Option<String>,
}

/// Flatten the tree into task rows in listed order.
pub fn task_rows(node: &WorkflowNode) -> Vec<TaskRow> {
    let mut rows = Vec::new();
    let mut pending = vec![(node, "$".to_string(), 0u64)];

    while let Some((node, path, delay_ms)) = pending.pop() {
        match node {
            WorkflowNode::Task(spec) => rows.push(TaskRow {
                path,
                target: spec.target.clone(),
                args: spec.args.clone(),
                delay_ms,
                queue: spec
                    .options
                    .get("queue")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            WorkflowNode::Chain { children } | WorkflowNode::Group { children } => {
                for (i, child) in children.iter().enumerate().rev() {
                    pending.push((child, format!("{path}.children[{i}]"), delay_ms));
                }
            }
            WorkflowNode::Delayed { inner, delay_ms: d } => {
                pending.push((inner, format!("{path}.task"), delay_ms.saturating_add(*d)));
            }
        }
    }

    rows
}

/// Render the tree one node per line.
pub fn render_tree(node: &WorkflowNode) -> Vec<String> {
    let mut lines = Vec::new();
    let mut pending = vec![(node, 0usize)];

    while let Some((node, depth)) = pending.pop() {
        let indent = "  ".repeat(depth);
        let label = match node {
            WorkflowNode::Task(spec) => spec.to_string(),
            WorkflowNode::Chain { children } => format!("chain ({} steps)", children.len()),
            WorkflowNode::Group { children } => format!("group ({} branches)", children.len()),
            WorkflowNode::Delayed { delay_ms, .. } => format!("delay {delay_ms}ms"),
        };
        lines.push(format!("{indent}{label}"));

        match node {
            WorkflowNode::Task(_) => {}
            WorkflowNode::Chain { children } | WorkflowNode::Group { children } => {
                for child in children.iter().rev() {
                    pending.push((child, depth + 1));
                }
            }
            WorkflowNode::Delayed { inner, .. } => pending.push((inner, depth + 1)),
        }
    }

    lines
}

pub fn validate(file: &Path, json: bool) -> Result<()> {
    let node = load_workflow_file(file)?;

    if json {
        let out = serde_json::json!({
            "valid": true,
            "kind": node.kind(),
            "tasks": node.task_count(),
            "depth": node.depth(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "  {} {} is a valid {} ({} tasks, depth {})",
            style("✓").green().bold(),
            style(file.display()).cyan(),
            node.kind(),
            node.task_count(),
            node.depth()
        );
    }
    Ok(())
}

pub fn inspect(file: &Path, json: bool) -> Result<()> {
    let node = load_workflow_file(file)?;
    let rows = task_rows(&node);

    if json {
        let out = serde_json::json!({
            "kind": node.kind(),
            "depth": node.depth(),
            "tasks": rows,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {}", style(file.display()).cyan().bold());
    println!();
    for line in render_tree(&node) {
        println!("    {line}");
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Target"),
            Cell::new("Args"),
            Cell::new("Delay"),
            Cell::new("Queue"),
            Cell::new("Path"),
        ]);

    for (i, row) in rows.iter().enumerate() {
        let delay = if row.delay_ms > 0 {
            format!("{}ms", row.delay_ms)
        } else {
            "-".to_string()
        };
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(&row.target),
            Cell::new(Value::Array(row.args.clone())),
            Cell::new(delay),
            Cell::new(row.queue.as_deref().unwrap_or("default")),
            Cell::new(&row.path),
        ]);
    }

    println!("{table}");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_types::workflow::TaskSpec;

    fn sample() -> WorkflowNode {
        WorkflowNode::chain([
            WorkflowNode::task("a", vec![json!(1)]),
            WorkflowNode::group([
                WorkflowNode::task("b", vec![]).with_delay(100),
                WorkflowNode::Task(TaskSpec::new("c").with_option("queue", json!("low"))),
            ])
            .with_delay(50),
        ])
    }

    #[test]
    fn test_task_rows_accumulate_delay() {
        let rows = task_rows(&sample());
        let targets: Vec<&str> = rows.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, vec!["a", "b", "c"]);
        assert_eq!(rows[0].delay_ms, 0);
        assert_eq!(rows[1].delay_ms, 150);
        assert_eq!(rows[1].path, "$.children[1].task.children[0].task");
        assert_eq!(rows[2].delay_ms, 50);
        assert_eq!(rows[2].queue.as_deref(), Some("low"));
    }

    #[test]
    fn test_render_tree() {
        let lines = render_tree(&sample());
        assert_eq!(lines[0], "chain (2 steps)");
        assert_eq!(lines[1], "  Task(a, [1])");
        assert_eq!(lines[2], "  delay 50ms");
        assert_eq!(lines[3], "    group (2 branches)");
        assert_eq!(lines.len(), 7);
    }
}
