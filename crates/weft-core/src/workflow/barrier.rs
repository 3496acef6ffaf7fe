//! Completion barrier.
//!
//! A keyed counter with an at-most-once release, built from two shared-store
//! counters:
//!
//! - `{prefix}{id}` starts at the party count and is decremented once per
//!   arriving branch.
//! - `{prefix}{id}:ran` starts at [`RELEASE_SENTINEL`]. An arrival that sees
//!   the party counter at or below zero increments it; only the increment that
//!   moves it from the sentinel to `0` wins the release.
//!
//! Every step is a single atomic store operation, so any number of workers
//! can arrive concurrently and exactly one of them observes `true`. Nothing
//! ever blocks: branches that are not last simply return `false` and leave the
//! continuation parked. If the keys expire before the last branch arrives, the
//! decrement hits a missing key, the release increment never lands on the
//! sentinel, and the continuation stays parked forever. Keys recreated by
//! such a late arrival get the barrier TTL again, so they expire as well.

use std::time::Duration;

use weft_types::config::BarrierConfig;
use weft_types::error::StoreError;

use crate::storage::store::SharedStore;

/// Initial value of the release flag; the winner moves it to `0`.
pub const RELEASE_SENTINEL: i64 = -1;

const RAN_SUFFIX: &str = ":ran";

/// Errors from barrier operations.
#[derive(Debug, thiserror::Error)]
pub enum BarrierError {
    #[error("barrier store error: {0}")]
    Store(#[from] StoreError),

    #[error("blocking wait is not supported by completion barriers")]
    BlockingUnsupported,

    #[error("barrier needs at least one party, got {0}")]
    InvalidParties(u32),
}

/// Key layout and lifetime shared by every barrier of an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct BarrierSettings {
    pub ttl: Duration,
    pub key_prefix: String,
}

impl Default for BarrierSettings {
    fn default() -> Self {
        Self::from(&BarrierConfig::default())
    }
}

impl From<&BarrierConfig> for BarrierSettings {
    fn from(config: &BarrierConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_secs),
            key_prefix: config.key_prefix.clone(),
        }
    }
}

/// Handle to one barrier in the shared store.
#[derive(Debug)]
pub struct CompletionBarrier<'a, S: SharedStore> {
    store: &'a S,
    id: String,
    key: String,
    ran_key: String,
    ttl: Duration,
}

impl<'a, S: SharedStore> CompletionBarrier<'a, S> {
    pub fn new(store: &'a S, id: &str, settings: &BarrierSettings) -> Self {
        let key = format!("{}{}", settings.key_prefix, id);
        let ran_key = format!("{key}{RAN_SUFFIX}");
        Self {
            store,
            id: id.to_string(),
            key,
            ran_key,
            ttl: settings.ttl,
        }
    }

    /// Barrier id (without prefix).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Store key of the party counter.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Initialize the counter to `parties` and arm the release flag.
    ///
    /// Called exactly once per barrier id by the engine.
    pub async fn create(&self, parties: u32) -> Result<(), BarrierError> {
        if parties == 0 {
            return Err(BarrierError::InvalidParties(parties));
        }
        self.store
            .set_counter(&self.key, i64::from(parties), self.ttl)
            .await?;
        self.store
            .set_counter(&self.ran_key, RELEASE_SENTINEL, self.ttl)
            .await?;
        tracing::debug!(barrier_id = %self.id, parties, "created barrier");
        Ok(())
    }

    /// Record one branch completion. Returns true for exactly one caller: the
    /// first to observe the counter at or below zero.
    ///
    /// With an `arrival` token (the job id) a redelivered completion is
    /// counted once no matter how often it arrives.
    pub async fn arrive(&self, arrival: Option<&str>) -> Result<bool, BarrierError> {
        let remaining = match arrival {
            Some(token) => self.store.decrement_once(&self.key, token).await?,
            None => self.store.decrement(&self.key).await?,
        };

        if remaining > 0 {
            tracing::trace!(barrier_id = %self.id, remaining, "barrier still waiting");
            return Ok(false);
        }

        let claimed = self.store.increment(&self.ran_key, 1).await?;
        let released = claimed == RELEASE_SENTINEL + 1;
        if !released {
            self.bound_recreated(&self.key).await?;
            self.bound_recreated(&self.ran_key).await?;
        }
        tracing::debug!(barrier_id = %self.id, remaining, released, "barrier drained");
        Ok(released)
    }

    /// A late arrival on an expired barrier recreates its keys without an
    /// expiry. Give them the barrier TTL again so they cannot outlive it.
    async fn bound_recreated(&self, key: &str) -> Result<(), BarrierError> {
        if self.store.ttl(key).await?.is_none() {
            self.store.expire(key, self.ttl).await?;
        }
        Ok(())
    }

    /// Poll-style wait. Only non-blocking polling is supported.
    pub async fn wait(&self, block: bool, arrival: Option<&str>) -> Result<bool, BarrierError> {
        if block {
            return Err(BarrierError::BlockingUnsupported);
        }
        self.arrive(arrival).await
    }

    /// Refresh the expiry of both keys without touching their values.
    /// Returns false if either key is already gone.
    pub async fn extend_ttl(&self, ttl: Duration) -> Result<bool, BarrierError> {
        let counter = self.store.expire(&self.key, ttl).await?;
        let flag = self.store.expire(&self.ran_key, ttl).await?;
        Ok(counter && flag)
    }

    /// Current party counter, if the barrier still exists.
    pub async fn remaining(&self) -> Result<Option<i64>, BarrierError> {
        Ok(self.store.counter(&self.key).await?)
    }
}
