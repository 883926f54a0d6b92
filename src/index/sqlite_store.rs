//! SQLite implementation of the IndexSink trait

use super::{IndexError, IndexSink};
use crate::models::EventRecord;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Embedded index for deployments without a search cluster
///
/// Rows are keyed by record id; indexing the same record twice keeps one
/// row. The full JSON document is stored next to the searchable columns.
#[derive(Clone)]
pub struct SqliteIndexSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteIndexSink {
    /// Open (or create) the index database at the specified path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, IndexError> {
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory index (useful for testing)
    pub fn in_memory() -> Result<Self, IndexError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, IndexError> {
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(SqliteIndexSink {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, IndexError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, IndexError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| IndexError::Unavailable("index connection lock poisoned".to_string()))?;
            f(&*guard)
        })
        .await
        .map_err(|e| IndexError::Unavailable(format!("index task failed: {}", e)))?
    }

    /// Number of indexed documents
    pub async fn count(&self) -> Result<usize, IndexError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    /// Fetch one document by record id
    pub async fn get(&self, id: &str) -> Result<Option<EventRecord>, IndexError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let document: Option<String> = conn
                .query_row(
                    "SELECT document FROM events WHERE id = ?",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;

            match document {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        })
        .await
    }
}

#[async_trait]
impl IndexSink for SqliteIndexSink {
    async fn write(&self, record: &EventRecord) -> Result<(), IndexError> {
        let document = serde_json::to_string(record)?;
        let record = record.clone();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO events
                 (id, timestamp, service_name, log_level, event_type, source_ip,
                  user_id, http_method, endpoint, response_time_ms, message, document)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    record.id,
                    record.timestamp.to_rfc3339(),
                    record.service_name,
                    record.log_level.as_str(),
                    record.event_type,
                    record.source_ip,
                    record.user_id,
                    record.http_method,
                    record.endpoint,
                    record.response_time_ms,
                    record.message,
                    document,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn health_check(&self) -> Result<(), IndexError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
