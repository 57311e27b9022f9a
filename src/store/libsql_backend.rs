//! libSQL backend: async `ConfigStore` and `DedupStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{Channel, ConfigStore, DedupStore, Keyword, StopWord};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a single-column `SELECT` returning `word` values.
    async fn list_words(&self, table: &str) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT word FROM {table} WHERE is_active = 1 ORDER BY id"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list {table}: {e}")))?;

        let mut words = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list {table}: {e}")))?
        {
            let word: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
            words.push(word);
        }
        Ok(words)
    }

    async fn upsert_word(&self, table: &str, word: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO {table} (word) VALUES (?1)
                     ON CONFLICT (word) DO UPDATE SET is_active = 1"
                ),
                params![word],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add to {table}: {e}")))?;
        Ok(())
    }

    async fn delete_word(&self, table: &str, word: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(&format!("DELETE FROM {table} WHERE word = ?1"), params![word])
            .await
            .map_err(|e| DatabaseError::Query(format!("remove from {table}: {e}")))?;
        Ok(affected > 0)
    }

    async fn query_i64(
        &self,
        op: &str,
        sql: &str,
        channel: &str,
    ) -> Result<Option<i64>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params![channel])
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            // NULL (e.g. MAX over no rows) fails to convert and reads as None
            Ok(Some(row)) => Ok(row.get::<i64>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

// ── Configuration ───────────────────────────────────────────────────

#[async_trait]
impl ConfigStore for LibSqlBackend {
    async fn list_channels(&self) -> Result<Vec<Channel>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT channel_id, name, is_active FROM channels WHERE is_active = 1 ORDER BY id",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_channels: {e}")))?;

        let mut channels = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_channels: {e}")))?
        {
            let active: i64 = row
                .get(2)
                .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
            channels.push(Channel {
                id: row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
                name: row.get::<String>(1).ok(),
                active: active != 0,
            });
        }
        Ok(channels)
    }

    async fn add_channel(&self, id: &str, name: Option<&str>) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO channels (channel_id, name) VALUES (?1, ?2)
                 ON CONFLICT (channel_id) DO UPDATE SET name = ?2, is_active = 1",
                params![id, opt_text(name)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_channel: {e}")))?;
        debug!(channel = id, "Channel added");
        Ok(())
    }

    async fn remove_channel(&self, id: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute("DELETE FROM channels WHERE channel_id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("remove_channel: {e}")))?;
        Ok(affected > 0)
    }

    async fn deactivate_channel(&self, id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE channels SET is_active = 0 WHERE channel_id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("deactivate_channel: {e}")))?;
        Ok(())
    }

    async fn list_keywords(&self) -> Result<Vec<Keyword>, DatabaseError> {
        Ok(self
            .list_words("keywords")
            .await?
            .into_iter()
            .map(Keyword::new)
            .collect())
    }

    async fn add_keyword(&self, text: &str) -> Result<(), DatabaseError> {
        self.upsert_word("keywords", text).await
    }

    async fn remove_keyword(&self, text: &str) -> Result<bool, DatabaseError> {
        self.delete_word("keywords", text).await
    }

    async fn list_stopwords(&self) -> Result<Vec<StopWord>, DatabaseError> {
        Ok(self
            .list_words("stopwords")
            .await?
            .into_iter()
            .map(StopWord::new)
            .collect())
    }

    async fn add_stopword(&self, text: &str) -> Result<(), DatabaseError> {
        self.upsert_word("stopwords", text).await
    }

    async fn remove_stopword(&self, text: &str) -> Result<bool, DatabaseError> {
        self.delete_word("stopwords", text).await
    }
}

// ── Dedup markers ───────────────────────────────────────────────────

#[async_trait]
impl DedupStore for LibSqlBackend {
    async fn is_processed(&self, channel: &str, message_id: i64) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM processed_messages WHERE channel_id = ?1 AND message_id = ?2",
                params![channel, message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_processed: {e}")))?;

        rows.next()
            .await
            .map(|row| row.is_some())
            .map_err(|e| DatabaseError::Query(format!("is_processed: {e}")))
    }

    async fn mark_processed(&self, channel: &str, message_id: i64) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO processed_messages (channel_id, message_id) VALUES (?1, ?2)
                 ON CONFLICT (channel_id, message_id) DO NOTHING",
                params![channel, message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_processed: {e}")))?;
        Ok(())
    }

    async fn first_run(&self, channel: &str) -> Result<bool, DatabaseError> {
        let found = self
            .query_i64(
                "first_run",
                "SELECT 1 FROM processed_messages WHERE channel_id = ?1 LIMIT 1",
                channel,
            )
            .await?;
        Ok(found.is_none())
    }

    async fn last_processed_id(&self, channel: &str) -> Result<Option<i64>, DatabaseError> {
        self.query_i64(
            "last_processed_id",
            "SELECT MAX(message_id) FROM processed_messages WHERE channel_id = ?1",
            channel,
        )
        .await
    }

    async fn reset(&self, channel: Option<&str>) -> Result<u64, DatabaseError> {
        let conn = self.conn();
        let removed = match channel {
            Some(channel) => {
                conn.execute(
                    "DELETE FROM processed_messages WHERE channel_id = ?1",
                    params![channel],
                )
                .await
            }
            None => conn.execute("DELETE FROM processed_messages", ()).await,
        }
        .map_err(|e| DatabaseError::Query(format!("reset: {e}")))?;

        info!(channel = channel.unwrap_or("*"), removed, "Dedup markers reset");
        Ok(removed)
    }
}
