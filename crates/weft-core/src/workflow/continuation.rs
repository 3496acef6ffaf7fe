//! Continuation storage.
//!
//! Decides what goes into a job payload's `workflow_continuations` field.
//! Inline storage embeds the encoded stack itself; external storage writes it
//! to the shared store and embeds only `{"ref": key}`. Retrieval understands
//! both shapes, so switching modes never strands jobs already in the queue.

use std::time::Duration;

use serde_json::{Value, json};
use uuid::Uuid;
use weft_types::config::{ContinuationConfig, ContinuationMode};
use weft_types::continuation::ContinuationStack;
use weft_types::error::StoreError;

use super::codec::{self, CodecError};
use crate::storage::store::SharedStore;

/// Key prefix for externally stored stacks.
pub const CONTINUATION_KEY_PREFIX: &str = "weft:continuations:";

const REF_FIELD: &str = "ref";

/// Errors from storing or retrieving continuation stacks.
#[derive(Debug, thiserror::Error)]
pub enum ContinuationError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("continuation store error: {0}")]
    Store(#[from] StoreError),

    #[error("continuation stack '{0}' not found")]
    Missing(String),
}

/// How continuation stacks are carried between jobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ContinuationStorage {
    #[default]
    Inline,
    External { ttl: Duration },
}

impl ContinuationStorage {
    pub fn from_config(config: &ContinuationConfig) -> Self {
        match config.mode {
            ContinuationMode::Inline => ContinuationStorage::Inline,
            ContinuationMode::External => ContinuationStorage::External {
                ttl: Duration::from_secs(config.ttl_secs),
            },
        }
    }

    /// Persist `stack` and return the reference to embed in the payload.
    pub async fn store<S: SharedStore>(
        &self,
        store: &S,
        stack: &ContinuationStack,
    ) -> Result<Value, ContinuationError> {
        let encoded = codec::encode_stack(stack)?;
        match self {
            ContinuationStorage::Inline => Ok(encoded),
            ContinuationStorage::External { ttl } => {
                let key = format!("{CONTINUATION_KEY_PREFIX}{}", Uuid::now_v7());
                store.put(&key, &encoded, *ttl).await?;
                tracing::trace!(key = %key, depth = stack.len(), "stored continuation stack");
                Ok(json!({ REF_FIELD: key }))
            }
        }
    }

    /// Resolve a payload reference back into a stack.
    pub async fn retrieve<S: SharedStore>(
        &self,
        store: &S,
        reference: &Value,
    ) -> Result<ContinuationStack, ContinuationError> {
        let Some(key) = reference.get(REF_FIELD).and_then(Value::as_str) else {
            return Ok(codec::decode_stack(reference)?);
        };
        let encoded = store
            .fetch(key)
            .await?
            .ok_or_else(|| ContinuationError::Missing(key.to_string()))?;
        Ok(codec::decode_stack(&encoded)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockStore;
    use weft_types::continuation::Continuation;
    use weft_types::workflow::WorkflowNode;

    fn stack() -> ContinuationStack {
        ContinuationStack::from(vec![
            Continuation::group_join("g"),
            Continuation::chain_tail("c", WorkflowNode::task("next", vec![])),
        ])
    }

    #[tokio::test]
    async fn test_inline_embeds_stack() {
        let store = MockStore::new();
        let storage = ContinuationStorage::Inline;
        let reference = storage.store(&store, &stack()).await.unwrap();

        assert!(reference.is_array());
        assert!(store.is_empty());
        assert_eq!(storage.retrieve(&store, &reference).await.unwrap(), stack());
    }

    #[tokio::test]
    async fn test_external_embeds_reference() {
        let store = MockStore::new();
        let storage = ContinuationStorage::External {
            ttl: Duration::from_secs(90),
        };
        let reference = storage.store(&store, &stack()).await.unwrap();

        let key = reference["ref"].as_str().unwrap();
        assert!(key.starts_with(CONTINUATION_KEY_PREFIX));
        assert_eq!(store.ttl(key).await.unwrap(), Some(Duration::from_secs(90)));
        assert_eq!(storage.retrieve(&store, &reference).await.unwrap(), stack());
    }

    #[tokio::test]
    async fn test_retrieve_accepts_either_shape() {
        let store = MockStore::new();
        let external = ContinuationStorage::External {
            ttl: Duration::from_secs(90),
        };
        let reference = external.store(&store, &stack()).await.unwrap();

        let inline = ContinuationStorage::Inline;
        assert_eq!(inline.retrieve(&store, &reference).await.unwrap(), stack());
        let embedded = inline.store(&store, &stack()).await.unwrap();
        assert_eq!(external.retrieve(&store, &embedded).await.unwrap(), stack());
    }

    #[tokio::test]
    async fn test_dangling_reference_is_missing() {
        let store = MockStore::new();
        let storage = ContinuationStorage::Inline;
        let err = storage
            .retrieve(&store, &json!({"ref": "weft:continuations:gone"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ContinuationError::Missing(key) if key.ends_with("gone")));
    }

    #[tokio::test]
    async fn test_null_reference_is_empty_stack() {
        let store = MockStore::new();
        let stack = ContinuationStorage::Inline
            .retrieve(&store, &Value::Null)
            .await
            .unwrap();
        assert!(stack.is_empty());
    }

    #[test]
    fn test_from_config() {
        let mut config = ContinuationConfig::default();
        assert_eq!(
            ContinuationStorage::from_config(&config),
            ContinuationStorage::Inline
        );
        config.mode = ContinuationMode::External;
        config.ttl_secs = 5;
        assert_eq!(
            ContinuationStorage::from_config(&config),
            ContinuationStorage::External {
                ttl: Duration::from_secs(5)
            }
        );
    }
}
