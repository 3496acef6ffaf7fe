//! `weft templates`: list the built-in templates.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use serde_json::Value;

use super::demo::demo_templates;

pub fn list_templates(json: bool) -> Result<()> {
    let templates = demo_templates()?;
    let mut entries = Vec::new();
    for name in templates.names() {
        let template = templates.get(&name)?;
        let node = template.build(&serde_json::Map::new())?;
        entries.push((name, template.defaults().clone(), node.task_count()));
    }

    if json {
        let out: Vec<Value> = entries
            .iter()
            .map(|(name, defaults, tasks)| {
                serde_json::json!({"name": name, "defaults": defaults, "tasks": tasks})
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Defaults"),
            Cell::new("Tasks"),
        ]);
    for (name, defaults, tasks) in &entries {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(Value::Object(defaults.clone())),
            Cell::new(tasks),
        ]);
    }
    println!("{table}");
    Ok(())
}
