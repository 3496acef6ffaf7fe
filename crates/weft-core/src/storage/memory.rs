//! Auxiliary workflow memory.
//!
//! A narrow write/read/clear interface keyed by run id. The runtime bridge
//! writes each job's output fields into it, and typed tasks hydrate missing
//! input fields from it, so decoupled jobs of one run can pass data without
//! explicit arguments.
//!
//! Follows the same blanket-impl pattern as the task handlers:
//! 1. `WorkflowMemory` uses RPITIT for async methods
//! 2. `WorkflowMemoryDyn` is the object-safe twin with boxed futures
//! 3. `BoxMemory` wraps `Box<dyn WorkflowMemoryDyn>` and delegates

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use weft_types::config::MemoryConfig;
use weft_types::error::StoreError;

use super::store::SharedStore;

/// Trait for run-scoped workflow memory.
pub trait WorkflowMemory: Send + Sync {
    /// Merge `fields` into the memory of `run_id`.
    fn write(
        &self,
        run_id: &str,
        fields: &Map<String, Value>,
    ) -> impl std::future::Future<Output = Result<(), MemoryError>> + Send;

    /// Read the subset of `keys` present for `run_id`.
    fn read(
        &self,
        run_id: &str,
        keys: &[String],
    ) -> impl std::future::Future<Output = Result<Map<String, Value>, MemoryError>> + Send;

    /// Drop everything stored for `run_id`.
    fn clear(
        &self,
        run_id: &str,
    ) -> impl std::future::Future<Output = Result<(), MemoryError>> + Send;
}

/// Object-safe version of [`WorkflowMemory`] with boxed futures.
pub trait WorkflowMemoryDyn: Send + Sync {
    fn write_boxed<'a>(
        &'a self,
        run_id: &'a str,
        fields: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<(), MemoryError>>;

    fn read_boxed<'a>(
        &'a self,
        run_id: &'a str,
        keys: &'a [String],
    ) -> BoxFuture<'a, Result<Map<String, Value>, MemoryError>>;

    fn clear_boxed<'a>(&'a self, run_id: &'a str) -> BoxFuture<'a, Result<(), MemoryError>>;
}

impl<T: WorkflowMemory> WorkflowMemoryDyn for T {
    fn write_boxed<'a>(
        &'a self,
        run_id: &'a str,
        fields: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(self.write(run_id, fields))
    }

    fn read_boxed<'a>(
        &'a self,
        run_id: &'a str,
        keys: &'a [String],
    ) -> BoxFuture<'a, Result<Map<String, Value>, MemoryError>> {
        Box::pin(self.read(run_id, keys))
    }

    fn clear_boxed<'a>(&'a self, run_id: &'a str) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(self.clear(run_id))
    }
}

/// Type-erased workflow memory, shared by the bridge and every job context.
pub struct BoxMemory {
    inner: Box<dyn WorkflowMemoryDyn>,
}

impl BoxMemory {
    pub fn new<T: WorkflowMemory + 'static>(memory: T) -> Self {
        Self {
            inner: Box::new(memory),
        }
    }

    pub async fn write(&self, run_id: &str, fields: &Map<String, Value>) -> Result<(), MemoryError> {
        self.inner.write_boxed(run_id, fields).await
    }

    pub async fn read(&self, run_id: &str, keys: &[String]) -> Result<Map<String, Value>, MemoryError> {
        self.inner.read_boxed(run_id, keys).await
    }

    pub async fn clear(&self, run_id: &str) -> Result<(), MemoryError> {
        self.inner.clear_boxed(run_id).await
    }
}

impl std::fmt::Debug for BoxMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxMemory").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// HashMemory
// ---------------------------------------------------------------------------

/// Workflow memory backed by one shared-store hash per run.
///
/// Key layout: `{key_prefix}:{run_id}`. Every write refreshes the TTL.
pub struct HashMemory<S: SharedStore> {
    store: Arc<S>,
    ttl: Duration,
    key_prefix: String,
}

impl<S: SharedStore> HashMemory<S> {
    pub fn new(store: Arc<S>, ttl: Duration, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            ttl,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn from_config(store: Arc<S>, config: &MemoryConfig) -> Self {
        Self::new(
            store,
            Duration::from_secs(config.ttl_secs),
            config.key_prefix.clone(),
        )
    }

    fn key(&self, run_id: &str) -> Result<String, MemoryError> {
        if run_id.trim().is_empty() {
            return Err(MemoryError::MissingRunId);
        }
        Ok(format!("{}:{}", self.key_prefix, run_id))
    }
}

impl<S: SharedStore> WorkflowMemory for HashMemory<S> {
    async fn write(&self, run_id: &str, fields: &Map<String, Value>) -> Result<(), MemoryError> {
        let key = self.key(run_id)?;
        self.store.hash_merge(&key, fields, self.ttl).await?;
        tracing::debug!(run_id, fields = fields.len(), "wrote workflow memory");
        Ok(())
    }

    async fn read(&self, run_id: &str, keys: &[String]) -> Result<Map<String, Value>, MemoryError> {
        let key = self.key(run_id)?;
        Ok(self.store.hash_read(&key, keys).await?)
    }

    async fn clear(&self, run_id: &str) -> Result<(), MemoryError> {
        let key = self.key(run_id)?;
        self.store.delete(&key).await?;
        Ok(())
    }
}

/// Errors from workflow memory operations.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("run_id is required")]
    MissingRunId,

    #[error("memory store error: {0}")]
    Store(#[from] StoreError),
}
