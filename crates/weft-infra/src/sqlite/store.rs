//! SQLite shared store implementation.
//!
//! Implements `SharedStore` from `weft-core`. Every key lives in one row of
//! `store_entries`; counters use the `counter` column, JSON values and hashes
//! are stored as JSON text in `value`. Read-modify-write operations run in a
//! transaction on the single-connection writer pool, so they are atomic for
//! every worker that shares the database file.

use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{Row, SqliteConnection};
use weft_core::storage::store::SharedStore;
use weft_types::error::StoreError;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `SharedStore`.
pub struct SqliteStore {
    pool: DatabasePool,
}

impl SqliteStore {
    /// Create a store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Delete every expired key and any arrival tokens left without a counter.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        let removed = sqlx::query("DELETE FROM store_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now_millis())
            .execute(&mut *tx)
            .await
            .map_err(query_err)?
            .rows_affected();
        sqlx::query("DELETE FROM counter_arrivals WHERE key NOT IN (SELECT key FROM store_entries)")
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        tx.commit().await.map_err(query_err)?;

        if removed > 0 {
            tracing::debug!(removed, "purged expired store keys");
        }
        Ok(removed)
    }

    async fn update_counter(&self, key: &str, token: Option<&str>, delta: i64) -> Result<i64, StoreError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        let row = load_live(&mut tx, key).await?;

        let current = match &row {
            None => 0,
            Some(row) if row.kind == "counter" => row.counter.unwrap_or(0),
            Some(row) => return Err(wrong_type(key, "counter", &row.kind)),
        };

        let apply = match token {
            Some(token) => {
                sqlx::query("INSERT OR IGNORE INTO counter_arrivals (key, token) VALUES (?, ?)")
                    .bind(key)
                    .bind(token)
                    .execute(&mut *tx)
                    .await
                    .map_err(query_err)?
                    .rows_affected()
                    == 1
            }
            None => true,
        };
        let next = if apply { current + delta } else { current };

        if row.is_none() {
            sqlx::query("INSERT INTO store_entries (key, kind, counter, value, expires_at) VALUES (?, 'counter', ?, NULL, NULL)")
                .bind(key)
                .bind(next)
                .execute(&mut *tx)
                .await
                .map_err(query_err)?;
        } else if apply {
            sqlx::query("UPDATE store_entries SET counter = ? WHERE key = ?")
                .bind(next)
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(query_err)?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(next)
    }

    async fn read_live(&self, key: &str) -> Result<Option<StoreRow>, StoreError> {
        let row = sqlx::query(
            "SELECT kind, counter, value, expires_at FROM store_entries
             WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now_millis())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.map(|row| StoreRow::from_row(&row).map_err(query_err))
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Private Row type for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct StoreRow {
    kind: String,
    counter: Option<i64>,
    value: Option<String>,
    expires_at: Option<i64>,
}

impl StoreRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            kind: row.try_get("kind")?,
            counter: row.try_get("counter")?,
            value: row.try_get("value")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    fn json(&self) -> Result<Value, StoreError> {
        let text = self.value.as_deref().unwrap_or("null");
        serde_json::from_str(text)
            .map_err(|e| StoreError::Serialization(format!("invalid JSON value: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_millis(ttl: Duration) -> i64 {
    let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_millis().saturating_add(ttl)
}

fn query_err(e: sqlx::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn wrong_type(key: &str, expected: &'static str, actual: &str) -> StoreError {
    let actual = match actual {
        "counter" => "counter",
        "value" => "value",
        "hash" => "hash",
        _ => "unknown",
    };
    StoreError::WrongType {
        key: key.to_string(),
        expected,
        actual,
    }
}

fn to_json_text(value: &Value) -> Result<String, StoreError> {
    serde_json::to_string(value)
        .map_err(|e| StoreError::Serialization(format!("failed to serialize value: {e}")))
}

/// Drop `key` if it has expired, then load it. Runs inside the caller's
/// write transaction.
async fn load_live(conn: &mut SqliteConnection, key: &str) -> Result<Option<StoreRow>, StoreError> {
    let expired = sqlx::query(
        "DELETE FROM store_entries WHERE key = ? AND expires_at IS NOT NULL AND expires_at <= ?",
    )
    .bind(key)
    .bind(now_millis())
    .execute(&mut *conn)
    .await
    .map_err(query_err)?
    .rows_affected();

    if expired > 0 {
        sqlx::query("DELETE FROM counter_arrivals WHERE key = ?")
            .bind(key)
            .execute(&mut *conn)
            .await
            .map_err(query_err)?;
    }

    let row = sqlx::query("SELECT kind, counter, value, expires_at FROM store_entries WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_err)?;

    row.map(|row| StoreRow::from_row(&row).map_err(query_err))
        .transpose()
}

// ---------------------------------------------------------------------------
// SharedStore implementation
// ---------------------------------------------------------------------------

impl SharedStore for SqliteStore {
    async fn set_counter(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query("DELETE FROM counter_arrivals WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;

        sqlx::query(
            r#"INSERT INTO store_entries (key, kind, counter, value, expires_at)
               VALUES (?, 'counter', ?, NULL, ?)
               ON CONFLICT (key) DO UPDATE SET
                   kind = 'counter', counter = excluded.counter,
                   value = NULL, expires_at = excluded.expires_at"#,
        )
        .bind(key)
        .bind(value)
        .bind(expiry_millis(ttl))
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        self.update_counter(key, None, -1).await
    }

    async fn decrement_once(&self, key: &str, token: &str) -> Result<i64, StoreError> {
        self.update_counter(key, Some(token), -1).await
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        self.update_counter(key, None, by).await
    }

    async fn counter(&self, key: &str) -> Result<Option<i64>, StoreError> {
        match self.read_live(key).await? {
            None => Ok(None),
            Some(row) if row.kind == "counter" => Ok(Some(row.counter.unwrap_or(0))),
            Some(row) => Err(wrong_type(key, "counter", &row.kind)),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE store_entries SET expires_at = ?
             WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(expiry_millis(ttl))
        .bind(key)
        .bind(now_millis())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = now_millis();
        Ok(self.read_live(key).await?.and_then(|row| row.expires_at).map(|at| {
            let remaining = u64::try_from(at.saturating_sub(now)).unwrap_or(0);
            Duration::from_millis(remaining)
        }))
    }

    async fn put(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), StoreError> {
        let text = to_json_text(value)?;
        sqlx::query(
            r#"INSERT INTO store_entries (key, kind, counter, value, expires_at)
               VALUES (?, 'value', NULL, ?, ?)
               ON CONFLICT (key) DO UPDATE SET
                   kind = 'value', counter = NULL,
                   value = excluded.value, expires_at = excluded.expires_at"#,
        )
        .bind(key)
        .bind(&text)
        .bind(expiry_millis(ttl))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self.read_live(key).await? {
            None => Ok(None),
            Some(row) if row.kind == "value" => Ok(Some(row.json()?)),
            Some(row) => Err(wrong_type(key, "value", &row.kind)),
        }
    }

    async fn hash_merge(&self, key: &str, fields: &Map<String, Value>, ttl: Duration) -> Result<(), StoreError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let mut hash = match load_live(&mut tx, key).await? {
            None => Map::new(),
            Some(row) if row.kind == "hash" => match row.json()? {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            Some(row) => return Err(wrong_type(key, "hash", &row.kind)),
        };
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        let text = to_json_text(&Value::Object(hash))?;

        sqlx::query(
            r#"INSERT INTO store_entries (key, kind, counter, value, expires_at)
               VALUES (?, 'hash', NULL, ?, ?)
               ON CONFLICT (key) DO UPDATE SET
                   value = excluded.value, expires_at = excluded.expires_at"#,
        )
        .bind(key)
        .bind(&text)
        .bind(expiry_millis(ttl))
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn hash_read(&self, key: &str, fields: &[String]) -> Result<Map<String, Value>, StoreError> {
        let hash = match self.read_live(key).await? {
            None => return Ok(Map::new()),
            Some(row) if row.kind == "hash" => row.json()?,
            Some(row) => return Err(wrong_type(key, "hash", &row.kind)),
        };
        Ok(fields
            .iter()
            .filter_map(|f| hash.get(f).map(|v| (f.clone(), v.clone())))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        let existed = load_live(&mut tx, key).await?.is_some();

        sqlx::query("DELETE FROM store_entries WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        sqlx::query("DELETE FROM counter_arrivals WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(existed)
    }
}
