//! In-process shared store.
//!
//! Implements `SharedStore` over a `DashMap`. Each operation runs under the
//! shard lock of its key, which makes every single-key operation atomic with
//! respect to concurrent workers in the same process.
//!
//! Expiry uses `tokio::time::Instant`, so tests running on a paused clock can
//! advance past TTLs deterministically. Expired entries are dropped lazily on
//! access, or in bulk by [`InMemoryStore::purge_expired`].

use std::collections::HashSet;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::mapref::one::{Ref, RefMut};
use serde_json::{Map, Value};
use tokio::time::Instant;
use weft_core::storage::store::SharedStore;
use weft_types::error::StoreError;

enum Slot {
    Counter { value: i64, arrivals: HashSet<String> },
    Value(Value),
    Hash(Map<String, Value>),
}

impl Slot {
    fn kind(&self) -> &'static str {
        match self {
            Slot::Counter { .. } => "counter",
            Slot::Value(_) => "value",
            Slot::Hash(_) => "hash",
        }
    }

    fn counter() -> Self {
        Slot::Counter {
            value: 0,
            arrivals: HashSet::new(),
        }
    }

    fn hash() -> Self {
        Slot::Hash(Map::new())
    }
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn fresh(slot: Slot) -> Self {
        Self {
            slot,
            expires_at: None,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

fn wrong_type(key: &str, expected: &'static str, slot: &Slot) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
        actual: slot.kind(),
    }
}

/// Shared store held in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    entries: DashMap<String, Entry>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "purged expired store keys");
        }
        removed
    }

    /// Live entry for `key`, created with `init` if missing or expired.
    fn live_entry(&self, key: &str, init: fn() -> Slot) -> RefMut<'_, String, Entry> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(occupied) => {
                let mut entry = occupied.into_ref();
                if !entry.is_live(now) {
                    *entry = Entry::fresh(init());
                }
                entry
            }
            MapEntry::Vacant(vacant) => vacant.insert(Entry::fresh(init())),
        }
    }

    /// Live entry for `key`, if any. Expired entries are removed.
    fn get_live(&self, key: &str) -> Option<Ref<'_, String, Entry>> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if entry.is_live(now) {
                return Some(entry);
            }
        }
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        None
    }

    fn update_counter(
        &self,
        key: &str,
        f: impl FnOnce(&mut i64, &mut HashSet<String>) -> i64,
    ) -> Result<i64, StoreError> {
        let mut entry = self.live_entry(key, Slot::counter);
        match &mut entry.slot {
            Slot::Counter { value, arrivals } => Ok(f(value, arrivals)),
            other => Err(wrong_type(key, "counter", other)),
        }
    }
}

impl SharedStore for InMemoryStore {
    async fn set_counter(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Counter {
                    value,
                    arrivals: HashSet::new(),
                },
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        self.update_counter(key, |value, _| {
            *value -= 1;
            *value
        })
    }

    async fn decrement_once(&self, key: &str, token: &str) -> Result<i64, StoreError> {
        self.update_counter(key, |value, arrivals| {
            if arrivals.insert(token.to_string()) {
                *value -= 1;
            }
            *value
        })
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        self.update_counter(key, |value, _| {
            *value += by;
            *value
        })
    }

    async fn counter(&self, key: &str) -> Result<Option<i64>, StoreError> {
        match self.get_live(key) {
            None => Ok(None),
            Some(entry) => match &entry.slot {
                Slot::Counter { value, .. } => Ok(Some(*value)),
                other => Err(wrong_type(key, "counter", other)),
            },
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        if self.get_live(key).is_none() {
            return Ok(false);
        }
        let now = Instant::now();
        Ok(match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            _ => false,
        })
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        Ok(self
            .get_live(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn put(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Value(value.clone()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self.get_live(key) {
            None => Ok(None),
            Some(entry) => match &entry.slot {
                Slot::Value(value) => Ok(Some(value.clone())),
                other => Err(wrong_type(key, "value", other)),
            },
        }
    }

    async fn hash_merge(&self, key: &str, fields: &Map<String, Value>, ttl: Duration) -> Result<(), StoreError> {
        let mut entry = self.live_entry(key, Slot::hash);
        match &mut entry.slot {
            Slot::Hash(hash) => {
                for (field, value) in fields {
                    hash.insert(field.clone(), value.clone());
                }
            }
            other => return Err(wrong_type(key, "hash", other)),
        }
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(())
    }

    async fn hash_read(&self, key: &str, fields: &[String]) -> Result<Map<String, Value>, StoreError> {
        match self.get_live(key) {
            None => Ok(Map::new()),
            Some(entry) => match &entry.slot {
                Slot::Hash(hash) => Ok(fields
                    .iter()
                    .filter_map(|f| hash.get(f).map(|v| (f.clone(), v.clone())))
                    .collect()),
                other => Err(wrong_type(key, "hash", other)),
            },
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live(now)))
    }
}
