//! SQLite event log implementation.
//!
//! Durable [`EventLog`](super::EventLog) backend using rusqlite. Events are
//! stored one row each with the meta payload serialized as JSON, indexed by
//! `(user_id, timestamp)` for per-user listings.

use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

use super::{EventLog, StoreError, StoreResult};
use crate::models::{EventType, UserEvent};

/// SQLite-backed event log.
pub struct SqliteEventLog {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteEventLog {
    /// Open (or create) the database at `path` and ensure the schema.
    ///
    /// # Errors
    /// Returns `StoreError` if the database cannot be opened or the schema
    /// cannot be created.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Connection(format!("Failed to open database: {}", e)))?;
        let log = Self {
            connection: Arc::new(Mutex::new(conn)),
        };
        log.create_schema()?;
        Ok(log)
    }

    fn create_schema(&self) -> StoreResult<()> {
        let conn = self
            .connection
            .lock()
            .map_err(|e| StoreError::Connection(format!("Lock error: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                source_id TEXT,
                query_id TEXT,
                meta_json TEXT
            )",
            [],
        )
        .map_err(|e| StoreError::Schema(format!("Failed to create events table: {}", e)))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_user_time
             ON events(user_id, timestamp)",
            [],
        )
        .map_err(|e| StoreError::Schema(format!("Failed to create index: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl EventLog for SqliteEventLog {
    async fn append(&self, event: &UserEvent) -> StoreResult<()> {
        let meta_json = match &event.meta {
            Some(meta) => Some(serde_json::to_string(meta).map_err(|e| {
                StoreError::Serialization(format!("Failed to serialize meta: {}", e))
            })?),
            None => None,
        };

        let conn = self
            .connection
            .lock()
            .map_err(|e| StoreError::Connection(format!("Lock error: {}", e)))?;
        conn.execute(
            "INSERT INTO events (user_id, timestamp, event_type, source_id, query_id, meta_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &event.user_id,
                &event.timestamp,
                event.event_type.as_str(),
                &event.source_id,
                &event.query_id,
                &meta_json,
            ],
        )
        .map_err(|e| StoreError::Query(format!("Failed to insert event: {}", e)))?;
        Ok(())
    }

    async fn list(&self, user_id: &str, limit: usize) -> StoreResult<Vec<UserEvent>> {
        let conn = self
            .connection
            .lock()
            .map_err(|e| StoreError::Connection(format!("Lock error: {}", e)))?;

        let mut stmt = conn
            .prepare(
                "SELECT user_id, timestamp, event_type, source_id, query_id, meta_json
                 FROM events WHERE user_id = ?1 ORDER BY timestamp ASC, id ASC LIMIT ?2",
            )
            .map_err(|e| StoreError::Query(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![user_id, limit as i64], |row| {
                let user_id: String = row.get(0)?;
                let timestamp: i64 = row.get(1)?;
                let event_type: String = row.get(2)?;
                let source_id: Option<String> = row.get(3)?;
                let query_id: Option<String> = row.get(4)?;
                let meta_json: Option<String> = row.get(5)?;
                Ok((user_id, timestamp, event_type, source_id, query_id, meta_json))
            })
            .map_err(|e| StoreError::Query(format!("Failed to query events: {}", e)))?;

        let mut events = Vec::new();
        for row in rows {
            let (user_id, timestamp, event_type, source_id, query_id, meta_json) =
                row.map_err(|e| StoreError::Query(format!("Failed to read event row: {}", e)))?;

            let Some(event_type) = EventType::parse(&event_type) else {
                warn!("skipping event row with unknown type {:?}", event_type);
                continue;
            };
            let meta = match meta_json {
                Some(json) => Some(serde_json::from_str(&json).map_err(|e| {
                    StoreError::Serialization(format!("Failed to deserialize meta: {}", e))
                })?),
                None => None,
            };
            events.push(UserEvent {
                user_id,
                timestamp,
                event_type,
                source_id,
                query_id,
                meta,
            });
        }
        Ok(events)
    }

    async fn count(&self, user_id: &str) -> StoreResult<usize> {
        let conn = self
            .connection
            .lock()
            .map_err(|e| StoreError::Connection(format!("Lock error: {}", e)))?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM events WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::Query(format!("Failed to count events: {}", e)))?;
        Ok(count as usize)
    }

    async fn delete_user(&self, user_id: &str) -> StoreResult<()> {
        let conn = self
            .connection
            .lock()
            .map_err(|e| StoreError::Connection(format!("Lock error: {}", e)))?;
        conn.execute("DELETE FROM events WHERE user_id = ?1", params![user_id])
            .map_err(|e| StoreError::Query(format!("Failed to delete events: {}", e)))?;
        Ok(())
    }
}
