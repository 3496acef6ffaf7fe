//! Named workflow templates.
//!
//! A template is a builder closure from a parameter object to a workflow
//! tree, registered under a name with default parameters. The registry is a
//! plain value: build one at startup and pass it where it is needed.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;
use weft_types::error::WorkflowError;
use weft_types::workflow::WorkflowNode;

use crate::queue::JobQueue;
use crate::storage::memory::{BoxMemory, MemoryError};
use crate::storage::store::SharedStore;
use crate::workflow::engine::{EngineError, RunEngine};

/// Errors from registering, building or running templates.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template name must be non-empty")]
    EmptyName,

    #[error("template '{0}' is already registered")]
    Duplicate(String),

    #[error("unknown template '{0}'")]
    Unknown(String),

    #[error("invalid template parameters: {0}")]
    InvalidParams(String),

    #[error("template produced an invalid workflow: {0}")]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

type Builder = Arc<dyn Fn(&Map<String, Value>) -> Result<WorkflowNode, TemplateError> + Send + Sync>;

/// A registered template.
#[derive(Clone)]
pub struct Template {
    name: String,
    defaults: Map<String, Value>,
    builder: Builder,
}

impl Template {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn defaults(&self) -> &Map<String, Value> {
        &self.defaults
    }

    /// Defaults overlaid with `params`.
    pub fn params(&self, params: &Map<String, Value>) -> Map<String, Value> {
        let mut merged = self.defaults.clone();
        for (key, value) in params {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    pub fn build(&self, params: &Map<String, Value>) -> Result<WorkflowNode, TemplateError> {
        let node = (self.builder)(&self.params(params))?;
        node.validate()?;
        Ok(node)
    }
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

/// Registry of named templates, ordered by name.
#[derive(Debug, Default, Clone)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        defaults: Map<String, Value>,
        builder: F,
    ) -> Result<(), TemplateError>
    where
        F: Fn(&Map<String, Value>) -> Result<WorkflowNode, TemplateError> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(TemplateError::EmptyName);
        }
        if self.templates.contains_key(&name) {
            return Err(TemplateError::Duplicate(name));
        }
        self.templates.insert(
            name.clone(),
            Template {
                name,
                defaults,
                builder: Arc::new(builder),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Template, TemplateError> {
        self.templates
            .get(name)
            .ok_or_else(|| TemplateError::Unknown(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn build(&self, name: &str, params: &Map<String, Value>) -> Result<WorkflowNode, TemplateError> {
        self.get(name)?.build(params)
    }

    /// Build and start a run of template `name`.
    ///
    /// When memory is given, the merged parameters are written to it under
    /// the new run id first, so typed tasks can hydrate them.
    pub async fn run<S: SharedStore, Q: JobQueue>(
        &self,
        name: &str,
        params: &Map<String, Value>,
        engine: &RunEngine<S, Q>,
        memory: Option<&BoxMemory>,
    ) -> Result<String, TemplateError> {
        let template = self.get(name)?;
        let node = template.build(params)?;
        let run_id = Uuid::now_v7().to_string();

        if let Some(memory) = memory {
            memory.write(&run_id, &template.params(params)).await?;
        }
        engine.run_with_id(&node, &run_id).await?;
        tracing::info!(template = name, run_id = %run_id, "template run started");
        Ok(run_id)
    }

    /// Template names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn clear(&mut self) {
        self.templates.clear();
    }
}
