//! Database pool with split reader/writer connections in WAL mode.
//!
//! SQLite allows only one writer at a time. The writer pool holds a single
//! connection, so every write transaction is serialized; that is what makes
//! the read-modify-write store operations atomic across workers sharing the
//! database. Readers use a multi-connection pool.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::default_data_dir;

/// Split read/write pool for SQLite with WAL mode.
///
/// - `reader`: Multi-connection pool (up to 8) for concurrent SELECT queries.
/// - `writer`: Single-connection pool for serialized writes.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if missing) the database and run migrations on the writer.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let read_opts = base_opts.clone().read_only(true);
        let write_opts = base_opts;

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(write_opts)
            .await?;

        // Run migrations on writer before opening reader pool
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(read_opts)
            .await?;

        tracing::debug!(database_url, "opened shared store database");
        Ok(Self { reader, writer })
    }
}

/// Default database URL: `{data_dir}/weft.db`, where the data directory
/// comes from `WEFT_DATA_DIR` or falls back to `~/.weft`.
pub fn default_database_url() -> String {
    format!("sqlite://{}/weft.db", default_data_dir().display())
}
