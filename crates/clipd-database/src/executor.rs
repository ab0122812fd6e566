//! Async SQLite executor using a dedicated background thread.
//!
//! This module provides an async-friendly interface to SQLite that:
//! - Uses a single dedicated thread for all SQLite operations
//! - Sends queries through a channel (non-blocking from caller's perspective)
//! - Keeps the Tokio runtime free for other async work
//!
//! SQLite serializes writes anyway, so one thread is optimal; queries
//! execute in FIFO order, which also serializes read-modify-write updates
//! to the same row.

use crate::{
    migrations, queries, DatabaseError, DatabaseResult, NewQueuedNote, NoteId, NoteStatus,
    QueuedNote, QueuedNotePatch,
};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Convert a tokio_rusqlite::Error to DatabaseError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> DatabaseError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => DatabaseError::Connection("Connection closed".to_string()),
        other => DatabaseError::Connection(other.to_string()),
    }
}

/// Async SQLite database with a dedicated executor thread.
///
/// All operations are sent to a single background thread via channel.
/// Opening can fail: unavailability is an error value the caller can act
/// on (the outbox falls back to blob storage), never a panic.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
    path: String,
}

impl Database {
    /// Open a database at the given path.
    ///
    /// This will:
    /// - Create the parent directory if it doesn't exist
    /// - Enable WAL mode and performance pragmas
    /// - Run any pending migrations
    /// - Start the dedicated executor thread
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();

        info!(path = %path_str, "Opening database");

        let conn = Connection::open(&path_str)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        conn.call(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA cache_size = -64000;
                PRAGMA temp_store = MEMORY;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        conn.call(|conn| {
            migrations::run_migrations(conn)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        info!(path = %path_str, "Database initialized with WAL mode");

        Ok(Self {
            conn,
            path: path_str,
        })
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        conn.call(|conn| {
            migrations::run_migrations(conn)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        Ok(Self {
            conn,
            path: ":memory:".to_string(),
        })
    }

    /// Execute a closure on the database connection.
    ///
    /// The closure runs on the dedicated SQLite thread. The caller's async
    /// task is parked (not blocked) until the result is ready. Only SQL
    /// queries and lightweight row mapping belong inside the closure.
    pub async fn call<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let outer_result = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Insert a new note, assigning its id.
    pub async fn insert_note(&self, note: NewQueuedNote) -> DatabaseResult<QueuedNote> {
        self.call(move |conn| queries::insert_note(conn, &note)).await
    }

    /// Get a note by id.
    pub async fn get_note(&self, id: NoteId) -> DatabaseResult<Option<QueuedNote>> {
        self.call(move |conn| queries::get_note(conn, id)).await
    }

    /// List all notes, newest first.
    pub async fn list_notes(&self) -> DatabaseResult<Vec<QueuedNote>> {
        self.call(queries::list_notes).await
    }

    /// List notes with a given status, newest first.
    pub async fn list_notes_with_status(
        &self,
        status: NoteStatus,
    ) -> DatabaseResult<Vec<QueuedNote>> {
        self.call(move |conn| queries::list_notes_with_status(conn, status))
            .await
    }

    /// Replace a full note record.
    pub async fn put_note(&self, note: QueuedNote) -> DatabaseResult<bool> {
        self.call(move |conn| queries::put_note(conn, &note)).await
    }

    /// Apply a typed patch to a note, refreshing `updated_at`.
    pub async fn update_note(
        &self,
        id: NoteId,
        patch: QueuedNotePatch,
    ) -> DatabaseResult<Option<QueuedNote>> {
        self.call(move |conn| queries::update_note(conn, id, &patch))
            .await
    }

    /// Delete a note by id.
    pub async fn delete_note(&self, id: NoteId) -> DatabaseResult<bool> {
        self.call(move |conn| queries::delete_note(conn, id)).await
    }

    /// Count all notes.
    pub async fn count_notes(&self) -> DatabaseResult<i64> {
        self.call(queries::count_notes).await
    }

    /// Get the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check if the database is healthy by executing a simple query.
    pub async fn health_check(&self) -> DatabaseResult<()> {
        self.call(|conn| {
            conn.execute_batch("SELECT 1")?;
            Ok(())
        })
        .await?;
        debug!("Database health check passed");
        Ok(())
    }

    /// Close the database connection.
    ///
    /// Waits for pending operations to complete, then shuts down the
    /// executor thread.
    pub async fn close(self) -> DatabaseResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to close database: {:?}", e)))?;
        info!(path = %self.path, "Database closed");
        Ok(())
    }
}
