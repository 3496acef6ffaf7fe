//! Configuration types for weft.
//!
//! `WeftConfig` is the top-level `weft.toml`. Every section and field has a
//! default so an empty file (or no file) is a valid configuration.

use serde::{Deserialize, Serialize};

/// Default barrier time-to-live (one day).
pub const DEFAULT_BARRIER_TTL_SECS: u64 = 86_400;

/// Default auxiliary memory time-to-live (one day).
pub const DEFAULT_MEMORY_TTL_SECS: u64 = 86_400;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeftConfig {
    #[serde(default)]
    pub barrier: BarrierConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub continuations: ContinuationConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

/// Completion barrier settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierConfig {
    /// How long barrier keys live in the shared store.
    #[serde(default = "default_barrier_ttl")]
    pub ttl_secs: u64,

    /// Prefix for barrier keys.
    #[serde(default = "default_barrier_prefix")]
    pub key_prefix: String,
}

fn default_barrier_ttl() -> u64 {
    DEFAULT_BARRIER_TTL_SECS
}

fn default_barrier_prefix() -> String {
    "weft:barrier:".to_string()
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_barrier_ttl(),
            key_prefix: default_barrier_prefix(),
        }
    }
}

/// Auxiliary memory settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Persist task outputs and hydrate typed task inputs.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_memory_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_memory_prefix")]
    pub key_prefix: String,
}

fn default_memory_ttl() -> u64 {
    DEFAULT_MEMORY_TTL_SECS
}

fn default_memory_prefix() -> String {
    "weft:mem".to_string()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: default_memory_ttl(),
            key_prefix: default_memory_prefix(),
        }
    }
}

/// Where continuation stacks live while a job is queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContinuationMode {
    /// Embedded in the job payload.
    #[default]
    Inline,
    /// Stored in the shared store; the payload carries a small reference.
    External,
}

/// Continuation storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationConfig {
    #[serde(default)]
    pub mode: ContinuationMode,

    /// TTL for externally stored stacks.
    #[serde(default = "default_barrier_ttl")]
    pub ttl_secs: u64,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            mode: ContinuationMode::default(),
            ttl_secs: default_barrier_ttl(),
        }
    }
}

/// In-process job queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum jobs executing at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retries for jobs that don't set a `retry` option.
    #[serde(default)]
    pub default_retries: u32,

    /// Base delay for exponential retry backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            default_retries: 0,
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

/// Shared store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Shared store settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// SQLite URL; defaults to `{data_dir}/weft.db` when unset.
    #[serde(default)]
    pub database_url: Option<String>,
}
