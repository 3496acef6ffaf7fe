//! Shared key-value store trait.
//!
//! The only shared mutable state in a weft deployment: barrier counters and
//! release flags, externalized continuation stacks and workflow memory. Every
//! method is a single atomic operation on one key; the engine never needs
//! multi-key transactions or client-side locks.
//!
//! Semantics follow Redis: a missing counter behaves like `0`, and an expired
//! key behaves exactly like a missing one.

use std::time::Duration;

use serde_json::{Map, Value};
use weft_types::error::StoreError;

/// Trait for the store shared by every worker.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// Implementations live in weft-infra.
pub trait SharedStore: Send + Sync {
    /// Set a counter to `value`, expiring after `ttl`. Replaces any previous value.
    fn set_counter(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Atomically decrement a counter and return the new value.
    fn decrement(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<i64, StoreError>> + Send;

    /// Atomically decrement a counter unless `token` was already recorded
    /// against it. Records `token` and returns the current value either way.
    fn decrement_once(
        &self,
        key: &str,
        token: &str,
    ) -> impl std::future::Future<Output = Result<i64, StoreError>> + Send;

    /// Atomically add `by` to a counter and return the new value.
    fn increment(
        &self,
        key: &str,
        by: i64,
    ) -> impl std::future::Future<Output = Result<i64, StoreError>> + Send;

    /// Read a counter. Returns None if the key does not exist.
    fn counter(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<i64>, StoreError>> + Send;

    /// Reset the expiry of an existing key. Returns false if the key does not exist.
    fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Remaining time-to-live. None if the key is missing or never expires.
    fn ttl(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<Duration>, StoreError>> + Send;

    /// Store a JSON value (upsert) with an expiry.
    fn put(
        &self,
        key: &str,
        value: &Value,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Read a JSON value stored with `put`.
    fn fetch(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<Value>, StoreError>> + Send;

    /// Merge fields into a hash (overwriting existing fields) and refresh its expiry.
    fn hash_merge(
        &self,
        key: &str,
        fields: &Map<String, Value>,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Read a subset of hash fields. Missing fields are absent from the result.
    fn hash_read(
        &self,
        key: &str,
        fields: &[String],
    ) -> impl std::future::Future<Output = Result<Map<String, Value>, StoreError>> + Send;

    /// Delete a key of any type. Returns whether it existed.
    fn delete(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;
}
