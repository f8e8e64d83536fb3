//! src/services/entry_store.rs
//!
//! Durable key → entry mapping. The SQLite implementation keeps one JSON
//! document per key and supports ordered prefix scans; every `set` is a
//! single upsert, durable once it returns.

use crate::{
    errors::{ArchiveError, ArchiveResult},
    models::entry::{Entry, SCHEMA_VERSION},
};
use async_trait::async_trait;
use chrono::Utc;
use futures::{StreamExt, stream::BoxStream};
use serde_json::Value;
use sqlx::{
    FromRow, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use std::{path::Path, str::FromStr, time::Duration};
use tracing::debug;

const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Canonical entry stored under `key`.
    ///
    /// Fails with `NotFound` for unknown keys and `LegacyRecord` for records
    /// written by an older schema.
    async fn get(&self, key: &str) -> ArchiveResult<Entry>;

    /// Overwrite the full record stored under `entry.key`.
    async fn set(&self, entry: &Entry) -> ArchiveResult<()>;

    async fn exists(&self, key: &str) -> ArchiveResult<bool>;

    /// Entries whose key starts with `prefix`, ordered by key.
    fn scan<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, ArchiveResult<Entry>>;

    /// Undecoded records whose key starts with `prefix`, ordered by key.
    /// Only the legacy-record upgrade reads records this way.
    async fn scan_raw(&self, prefix: &str) -> ArchiveResult<Vec<(String, Value)>>;
}

/// Decode a stored document, refusing records from an older schema.
pub fn decode_entry(key: &str, record: Value) -> ArchiveResult<Entry> {
    let version = record.get("schema_version").and_then(Value::as_u64);
    if version != Some(u64::from(SCHEMA_VERSION)) {
        return Err(ArchiveError::LegacyRecord(key.to_string()));
    }
    Ok(serde_json::from_value(record)?)
}

#[derive(FromRow)]
struct EntryRow {
    key: String,
    data: String,
}

impl EntryRow {
    fn into_raw(self) -> ArchiveResult<(String, Value)> {
        let value = serde_json::from_str(&self.data)?;
        Ok((self.key, value))
    }

    fn into_entry(self) -> ArchiveResult<Entry> {
        let (key, value) = self.into_raw()?;
        decode_entry(&key, value)
    }
}

/// SQLite-backed entry store.
#[derive(Clone)]
pub struct SqliteEntryStore {
    pool: SqlitePool,
}

impl SqliteEntryStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> ArchiveResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the embedded schema. Every statement is idempotent.
    async fn migrate(&self) -> ArchiveResult<()> {
        let statements = INIT_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in statements {
            debug!("Executing schema SQL: {}", stmt);
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub async fn insert_raw(&self, key: &str, record: &Value) -> ArchiveResult<()> {
        self.upsert(key, &serde_json::to_string(record)?).await
    }

    async fn upsert(&self, key: &str, data: &str) -> ArchiveResult<()> {
        sqlx::query(
            "INSERT INTO entries (key, data, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(data)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EntryStore for SqliteEntryStore {
    async fn get(&self, key: &str) -> ArchiveResult<Entry> {
        sqlx::query_as::<_, EntryRow>("SELECT key, data FROM entries WHERE key = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => ArchiveError::NotFound(key.to_string()),
                other => ArchiveError::Sqlx(other),
            })?
            .into_entry()
    }

    async fn set(&self, entry: &Entry) -> ArchiveResult<()> {
        let data = serde_json::to_string(entry)?;
        self.upsert(&entry.key, &data).await
    }

    async fn exists(&self, key: &str) -> ArchiveResult<bool> {
        let found: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM entries WHERE key = ?)")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(found)
    }

    fn scan<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, ArchiveResult<Entry>> {
        // substr instead of LIKE: `_` in key prefixes is a LIKE wildcard.
        sqlx::query_as::<_, EntryRow>(
            "SELECT key, data FROM entries
             WHERE substr(key, 1, length(?)) = ?
             ORDER BY key ASC",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch(&self.pool)
        .map(|row| row.map_err(ArchiveError::from).and_then(EntryRow::into_entry))
        .boxed()
    }

    async fn scan_raw(&self, prefix: &str) -> ArchiveResult<Vec<(String, Value)>> {
        sqlx::query_as::<_, EntryRow>(
            "SELECT key, data FROM entries
             WHERE substr(key, 1, length(?)) = ?
             ORDER BY key ASC",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(EntryRow::into_raw)
        .collect()
    }
}
