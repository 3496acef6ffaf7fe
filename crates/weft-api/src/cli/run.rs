//! `weft run`: execute a workflow in-process.
//!
//! Builds the engine over the configured shared store, a local queue and a
//! worker pool, starts the run and works the queue until it is idle. Task
//! outputs always go to workflow memory so they can be printed afterwards.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Map, Value, json};
use weft_core::storage::memory::{BoxMemory, HashMemory};
use weft_core::storage::store::SharedStore;
use weft_core::workflow::bridge::RuntimeBridge;
use weft_core::workflow::engine::{EngineSettings, RunEngine};
use weft_infra::config::default_data_dir;
use weft_infra::queue::local::LocalQueue;
use weft_infra::queue::worker::{Worker, WorkerSettings};
use weft_infra::sqlite::pool::{DatabasePool, default_database_url};
use weft_infra::sqlite::store::SqliteStore;
use weft_infra::store::memory::InMemoryStore;
use weft_types::config::{StoreBackend, WeftConfig};

use super::demo::{OUTPUT_FIELDS, Recorder, demo_registry, demo_templates};
use super::file::load_workflow_file;

/// What to run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunSource {
    File(PathBuf),
    Template {
        name: String,
        params: Map<String, Value>,
    },
}

impl RunSource {
    pub fn from_args(file: Option<PathBuf>, template: Option<String>, params: &[String]) -> Result<Self> {
        match (file, template) {
            (Some(file), None) => Ok(RunSource::File(file)),
            (None, Some(name)) => Ok(RunSource::Template {
                name,
                params: parse_params(params)?,
            }),
            _ => bail!("Pass either a workflow file or --template"),
        }
    }
}

/// Parse `key=value` pairs. Values that parse as JSON keep their type;
/// anything else is a string.
pub fn parse_params(params: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for param in params {
        let Some((key, raw)) = param.split_once('=') else {
            bail!("Invalid parameter '{param}', expected key=value");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid parameter '{param}', empty key");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

pub async fn run(source: RunSource, config: &WeftConfig, json: bool, quiet: bool) -> Result<()> {
    match config.store.backend {
        StoreBackend::Memory => execute(Arc::new(InMemoryStore::new()), source, config, json, quiet).await,
        StoreBackend::Sqlite => {
            let url = match &config.store.database_url {
                Some(url) => url.clone(),
                None => {
                    let dir = default_data_dir();
                    tokio::fs::create_dir_all(&dir)
                        .await
                        .with_context(|| format!("Failed to create {}", dir.display()))?;
                    default_database_url()
                }
            };
            let pool = DatabasePool::new(&url)
                .await
                .with_context(|| format!("Failed to open shared store at {url}"))?;
            execute(Arc::new(SqliteStore::new(pool)), source, config, json, quiet).await
        }
    }
}

async fn execute<S: SharedStore + 'static>(
    store: Arc<S>,
    source: RunSource,
    config: &WeftConfig,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let recorder = Recorder::new();
    let registry = demo_registry(&recorder)?;
    let engine = Arc::new(RunEngine::new(
        Arc::clone(&store),
        LocalQueue::new(),
        EngineSettings::from_config(config),
    ));
    let memory = Arc::new(BoxMemory::new(HashMemory::from_config(
        Arc::clone(&store),
        &config.memory,
    )));
    let bridge = RuntimeBridge::new(Arc::clone(&engine), Arc::new(registry)).with_memory(Arc::clone(&memory));
    let worker = Worker::new(Arc::new(bridge), WorkerSettings::from(&config.queue));

    let started = std::time::Instant::now();
    let run_id = match source {
        RunSource::File(path) => {
            let node = load_workflow_file(&path)?;
            engine.run(&node).await.context("Failed to start run")?
        }
        RunSource::Template { name, params } => demo_templates()?
            .run(&name, &params, engine.as_ref(), Some(memory.as_ref()))
            .await
            .with_context(|| format!("Failed to start template '{name}'"))?,
    };

    let stats = worker.run_until_idle().await;
    let elapsed = started.elapsed();
    let dead = worker.queue().dead_jobs().await;
    let fields: Vec<String> = OUTPUT_FIELDS.iter().map(|f| f.to_string()).collect();
    let outputs = memory.read(&run_id, &fields).await?;
    let executions = recorder.executions();

    if json {
        let out = json!({
            "run_id": run_id,
            "elapsed_ms": elapsed.as_millis() as u64,
            "executions": executions,
            "stats": {
                "executed": stats.executed,
                "succeeded": stats.succeeded,
                "retried": stats.retried,
                "dead": stats.dead,
            },
            "dead": dead
                .iter()
                .map(|d| json!({"jid": d.job.jid, "target": d.job.target, "error": d.error}))
                .collect::<Vec<_>>(),
            "memory": outputs,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if quiet {
        println!("{run_id}");
    } else {
        println!();
        println!(
            "  {} Run {} finished in {}ms",
            style("*").green().bold(),
            style(&run_id).cyan(),
            elapsed.as_millis()
        );
        println!();

        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("#").fg(Color::Cyan),
                Cell::new("Target"),
                Cell::new("Args"),
                Cell::new("Attempt"),
            ]);
        for (i, execution) in executions.iter().enumerate() {
            table.add_row(vec![
                Cell::new(i + 1),
                Cell::new(&execution.target),
                Cell::new(Value::Array(execution.args.clone())),
                Cell::new(execution.attempt),
            ]);
        }
        println!("{table}");
        println!();
        println!(
            "  Jobs: {} executed, {} succeeded, {} retried, {} dead",
            stats.executed, stats.succeeded, stats.retried, stats.dead
        );

        for d in &dead {
            println!(
                "  {} {} ({}): {}",
                style("✗").red(),
                d.job.target,
                d.job.jid,
                d.error
            );
        }

        if !outputs.is_empty() {
            println!();
            println!("  Memory:");
            println!("{}", serde_json::to_string_pretty(&Value::Object(outputs))?);
        }
        println!();
    }

    if !dead.is_empty() {
        bail!("{} job(s) failed permanently", dead.len());
    }
    Ok(())
}
