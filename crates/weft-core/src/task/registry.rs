//! Task registry.
//!
//! Maps stable target names to handlers. Built once at process start and
//! shared by reference with the runtime bridge; tests build a fresh one each.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use weft_types::job::NOOP_TARGET;

use super::handler::{FnHandler, NoopTask, TaskError, TaskHandler, TaskHandlerDyn, TaskOutput};

/// Errors from registering handlers.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("task name must be non-empty")]
    EmptyName,

    #[error("task '{0}' is already registered")]
    Duplicate(String),
}

/// Name-to-handler table. `weft.noop` is always present.
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandlerDyn>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let mut handlers: HashMap<String, Arc<dyn TaskHandlerDyn>> = HashMap::new();
        handlers.insert(NOOP_TARGET.to_string(), Arc::new(NoopTask));
        Self { handlers }
    }

    /// Register `handler` under `name`.
    pub fn register<H: TaskHandler + 'static>(
        &mut self,
        name: impl Into<String>,
        handler: H,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        tracing::debug!(task = %name, "registered task");
        self.handlers.insert(name, Arc::new(handler));
        Ok(())
    }

    /// Register a closure over the argument list.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Result<(), RegistryError>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskOutput, TaskError>> + Send + 'static,
    {
        self.register(name, FnHandler::new(f))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandlerDyn>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Drop every user handler. The built-in no-op stays registered.
    pub fn clear(&mut self) {
        self.handlers.retain(|name, _| name == NOOP_TARGET);
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
