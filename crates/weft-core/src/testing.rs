//! In-crate test doubles: a shared store, a recording queue and a helper that
//! drains the queue through a runtime bridge.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use weft_types::error::{QueueError, StoreError};
use weft_types::job::JobPayload;

use crate::queue::JobQueue;
use crate::storage::store::SharedStore;
use crate::workflow::bridge::{BridgeError, RuntimeBridge};

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

enum Slot {
    Counter { value: i64, tokens: HashSet<String> },
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
}

struct Entry {
    slot: Slot,
    ttl: Option<Duration>,
}

/// Shared store over a mutex-guarded map. TTLs are recorded but never
/// elapse; tests simulate expiry with [`MockStore::evict`].
#[derive(Default)]
pub struct MockStore {
    entries: Mutex<HashMap<String, Entry>>,
    failure: Mutex<Option<(usize, String)>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next store call fail with a query error.
    pub fn fail_next(&self, message: &str) {
        self.fail_at(0, message);
    }

    /// Let `calls` store calls succeed, then fail the one after with a query error.
    pub fn fail_at(&self, calls: usize, message: &str) {
        *self.failure.lock().unwrap() = Some((calls, message.to_string()));
    }

    /// Drop a key as if its TTL had elapsed.
    pub fn evict(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    fn check(&self) -> Result<(), StoreError> {
        let mut failure = self.failure.lock().unwrap();
        if let Some((calls, _)) = failure.as_mut() {
            if *calls > 0 {
                *calls -= 1;
                return Ok(());
            }
        }
        match failure.take() {
            Some((_, message)) => Err(StoreError::Query(message)),
            None => Ok(()),
        }
    }

    fn with_counter<R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut i64, &mut HashSet<String>) -> R,
    ) -> Result<R, StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Counter {
                value: 0,
                tokens: HashSet::new(),
            },
            ttl: None,
        });
        match &mut entry.slot {
            Slot::Counter { value, tokens } => Ok(f(value, tokens)),
            other => Err(StoreError::WrongType {
                key: key.to_string(),
                expected: "counter",
                actual: other.kind(),
            }),
        }
    }
}

impl SharedStore for MockStore {
    async fn set_counter(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.entries.lock().unwrap().insert(
            key.to_string(),
            Entry {
                slot: Slot::Counter {
                    value,
                    tokens: HashSet::new(),
                },
                ttl: Some(ttl),
            },
        );
        Ok(())
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        self.with_counter(key, |value, _| {
            *value -= 1;
            *value
        })
    }

    async fn decrement_once(&self, key: &str, token: &str) -> Result<i64, StoreError> {
        self.with_counter(key, |value, tokens| {
            if tokens.insert(token.to_string()) {
                *value -= 1;
            }
            *value
        })
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        self.with_counter(key, |value, _| {
            *value += by;
            *value
        })
    }

    async fn counter(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.check()?;
        let entries = self.entries.lock().unwrap();
        match entries.get(key).map(|e| &e.slot) {
            None => Ok(None),
            Some(Slot::Counter { value, .. }) => Ok(Some(*value)),
            Some(other) => Err(StoreError::WrongType {
                key: key.to_string(),
                expected: "counter",
                actual: other.kind(),
            }),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        Ok(match entries.get_mut(key) {
            Some(entry) => {
                entry.ttl = Some(ttl);
                true
            }
            None => false,
        })
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.check()?;
        Ok(self.entries.lock().unwrap().get(key).and_then(|e| e.ttl))
    }

    async fn put(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.entries.lock().unwrap().insert(
            key.to_string(),
            Entry {
                slot: Slot::Value(value.clone()),
                ttl: Some(ttl),
            },
        );
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.check()?;
        let entries = self.entries.lock().unwrap();
        match entries.get(key).map(|e| &e.slot) {
            None => Ok(None),
            Some(Slot::Value(value)) => Ok(Some(value.clone())),
            Some(other) => Err(StoreError::WrongType {
                key: key.to_string(),
                expected: "value",
                actual: other.kind(),
            }),
        }
    }

    async fn hash_merge(&self, key: &str, fields: &Map<String, Value>, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Hash(Map::new()),
            ttl: None,
        });
        match &mut entry.slot {
            Slot::Hash(hash) => {
                for (k, v) in fields {
                    hash.insert(k.clone(), v.clone());
                }
                entry.ttl = Some(ttl);
                Ok(())
            }
            other => Err(StoreError::WrongType {
                key: key.to_string(),
                expected: "hash",
                actual: other.kind(),
            }),
        }
    }

    async fn hash_read(&self, key: &str, fields: &[String]) -> Result<Map<String, Value>, StoreError> {
        self.check()?;
        let entries = self.entries.lock().unwrap();
        match entries.get(key).map(|e| &e.slot) {
            None => Ok(Map::new()),
            Some(Slot::Hash(hash)) => Ok(fields
                .iter()
                .filter_map(|f| hash.get(f).map(|v| (f.clone(), v.clone())))
                .collect()),
            Some(other) => Err(StoreError::WrongType {
                key: key.to_string(),
                expected: "hash",
                actual: other.kind(),
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.entries.lock().unwrap().remove(key).is_some())
    }
}

// ---------------------------------------------------------------------------
// RecordingQueue
// ---------------------------------------------------------------------------

type Recorded = (JobPayload, Option<DateTime<Utc>>);

/// Queue that records enqueued jobs instead of running them.
#[derive(Clone, Default)]
pub struct RecordingQueue {
    jobs: Arc<Mutex<Vec<Recorded>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything enqueued and not yet taken.
    pub fn jobs(&self) -> Vec<Recorded> {
        self.jobs.lock().unwrap().clone()
    }

    /// Remove and return everything enqueued so far, in enqueue order.
    pub fn take(&self) -> Vec<Recorded> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }

    /// Make the next enqueue fail.
    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

impl JobQueue for RecordingQueue {
    async fn enqueue(&self, job: JobPayload, at: Option<DateTime<Utc>>) -> Result<String, QueueError> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(QueueError::Enqueue("injected failure".to_string()));
        }
        let jid = job.jid.clone();
        self.jobs.lock().unwrap().push((job, at));
        Ok(jid)
    }
}

/// Execute queued jobs through `bridge`, in enqueue order, until the queue
/// stays empty. Scheduled times are ignored. Returns how many jobs ran.
pub async fn drain(bridge: &RuntimeBridge<MockStore, RecordingQueue>) -> Result<usize, BridgeError> {
    let mut executed = 0;
    loop {
        let batch = bridge.engine().queue().take();
        if batch.is_empty() {
            return Ok(executed);
        }
        for (job, _) in batch {
            bridge.execute(&job).await?;
            executed += 1;
        }
    }
}
