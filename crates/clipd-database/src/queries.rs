//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` as its first parameter so it can run
//! inside the async executor's `call()` as well as against a plain test
//! connection.

use crate::{
    DatabaseError, DatabaseResult, NewQueuedNote, NoteId, NoteKind, NoteStatus, QueuedNote,
    QueuedNotePatch,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::collections::HashMap;

const NOTE_COLUMNS: &str =
    "id, content, kind, url, title, status, retry_count, last_error, metadata, created_at, updated_at";

/// Insert a new note with status `pending` and a store-assigned id.
pub fn insert_note(conn: &Connection, note: &NewQueuedNote) -> DatabaseResult<QueuedNote> {
    let now = Utc::now().to_rfc3339();
    let metadata = serde_json::to_string(&note.metadata)?;
    conn.execute(
        "INSERT INTO note_outbox (content, kind, url, title, status, retry_count, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?6)",
        params![
            note.content,
            note.kind.as_i64(),
            note.url,
            note.title,
            metadata,
            now,
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_note(conn, id)?
        .ok_or_else(|| DatabaseError::NotFound("Note not found after insert".to_string()))
}

/// Get a note by id. A missing row is `None`, not an error.
pub fn get_note(conn: &Connection, id: NoteId) -> DatabaseResult<Option<QueuedNote>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {NOTE_COLUMNS} FROM note_outbox WHERE id = ?1"
    ))?;

    let result = stmt.query_row(params![id], map_note_row);

    match result {
        Ok(note) => Ok(Some(note)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List all notes, newest first.
pub fn list_notes(conn: &Connection) -> DatabaseResult<Vec<QueuedNote>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {NOTE_COLUMNS} FROM note_outbox ORDER BY created_at DESC, id DESC"
    ))?;

    let notes = stmt
        .query_map([], map_note_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(notes)
}

/// List notes with a given status, newest first.
pub fn list_notes_with_status(
    conn: &Connection,
    status: NoteStatus,
) -> DatabaseResult<Vec<QueuedNote>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {NOTE_COLUMNS} FROM note_outbox WHERE status = ?1 ORDER BY created_at DESC, id DESC"
    ))?;

    let notes = stmt
        .query_map(params![status.as_str()], map_note_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(notes)
}

/// Replace a full note record. Returns whether a row existed.
///
/// The caller controls every field including `updated_at`; the mutable-field
/// update path with timestamp refresh is [`update_note`].
pub fn put_note(conn: &Connection, note: &QueuedNote) -> DatabaseResult<bool> {
    let metadata = serde_json::to_string(&note.metadata)?;
    let count = conn.execute(
        "UPDATE note_outbox
         SET content = ?1, kind = ?2, url = ?3, title = ?4, status = ?5,
             retry_count = ?6, last_error = ?7, metadata = ?8,
             created_at = ?9, updated_at = ?10
         WHERE id = ?11",
        params![
            note.content,
            note.kind.as_i64(),
            note.url,
            note.title,
            note.status.as_str(),
            note.retry_count,
            note.last_error,
            metadata,
            note.created_at.to_rfc3339(),
            note.updated_at.to_rfc3339(),
            note.id,
        ],
    )?;
    Ok(count > 0)
}

/// Apply a typed patch to a note in a single UPDATE, refreshing `updated_at`.
///
/// Only the columns named by the patch are touched, so concurrent patches to
/// the same row merge instead of overwriting each other. Returns the updated
/// note, or `None` if the id is missing.
pub fn update_note(
    conn: &Connection,
    id: NoteId,
    patch: &QueuedNotePatch,
) -> DatabaseResult<Option<QueuedNote>> {
    let now = Utc::now().to_rfc3339();
    let mut sets: Vec<&str> = vec!["updated_at = ?"];
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];

    if let Some(status) = patch.status {
        sets.push("status = ?");
        values.push(Box::new(status.as_str()));
    }
    if let Some(retry_count) = patch.retry_count {
        sets.push("retry_count = ?");
        values.push(Box::new(retry_count));
    }
    if patch.clear_last_error {
        sets.push("last_error = NULL");
    } else if let Some(ref last_error) = patch.last_error {
        sets.push("last_error = ?");
        values.push(Box::new(last_error.clone()));
    }

    let sql = format!(
        "UPDATE note_outbox SET {} WHERE id = ?",
        sets.join(", ")
    );
    values.push(Box::new(id));

    let params_vec: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let count = conn.execute(&sql, params_vec.as_slice())?;

    if count == 0 {
        return Ok(None);
    }
    get_note(conn, id)
}

/// Delete a note by id. Deleting a missing id is not an error.
pub fn delete_note(conn: &Connection, id: NoteId) -> DatabaseResult<bool> {
    let count = conn.execute("DELETE FROM note_outbox WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

/// Count all notes.
pub fn count_notes(conn: &Connection) -> DatabaseResult<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM note_outbox", [], |row| row.get(0))?;
    Ok(count)
}

fn map_note_row(row: &Row) -> rusqlite::Result<QueuedNote> {
    let metadata_json: String = row.get(8)?;
    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_json).unwrap_or_default();
    Ok(QueuedNote {
        id: row.get(0)?,
        content: row.get(1)?,
        kind: NoteKind::from_i64(row.get(2)?),
        url: row.get(3)?,
        title: row.get(4)?,
        status: NoteStatus::from_str(&row.get::<_, String>(5)?),
        retry_count: row.get(6)?,
        last_error: row.get(7)?,
        metadata,
        created_at: parse_datetime(row.get::<_, String>(9)?),
        updated_at: parse_datetime(row.get::<_, String>(10)?),
    })
}

/// Parse an RFC3339 datetime string, falling back to current time on error.
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_migrations;

    fn create_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn new_note(content: &str) -> NewQueuedNote {
        NewQueuedNote {
            content: content.to_string(),
            kind: NoteKind::Page,
            url: "https://example.com/article".to_string(),
            title: "Article".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_insert_assigns_increasing_ids() {
        let conn = create_test_conn();

        let first = insert_note(&conn, &new_note("one")).unwrap();
        let second = insert_note(&conn, &new_note("two")).unwrap();

        assert!(second.id > first.id);
        assert_eq!(first.status, NoteStatus::Pending);
        assert_eq!(first.retry_count, 0);
        assert!(first.last_error.is_none());
        assert_eq!(first.created_at, first.updated_at);
    }

    #[test]
    fn test_get_note_missing_is_none() {
        let conn = create_test_conn();
        assert!(get_note(&conn, 42).unwrap().is_none());
    }

    #[test]
    fn test_list_notes_newest_first() {
        let conn = create_test_conn();

        let a = insert_note(&conn, &new_note("a")).unwrap();
        let b = insert_note(&conn, &new_note("b")).unwrap();
        let c = insert_note(&conn, &new_note("c")).unwrap();

        let notes = list_notes(&conn).unwrap();
        assert_eq!(notes.len(), 3);
        // Same-timestamp inserts fall back to id ordering
        assert_eq!(notes[0].id, c.id);
        assert_eq!(notes[1].id, b.id);
        assert_eq!(notes[2].id, a.id);
    }

    #[test]
    fn test_list_notes_with_status() {
        let conn = create_test_conn();

        let a = insert_note(&conn, &new_note("a")).unwrap();
        insert_note(&conn, &new_note("b")).unwrap();

        update_note(
            &conn,
            a.id,
            &QueuedNotePatch {
                status: Some(NoteStatus::Success),
                ..Default::default()
            },
        )
        .unwrap();

        let pending = list_notes_with_status(&conn, NoteStatus::Pending).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].content, "b");

        let success = list_notes_with_status(&conn, NoteStatus::Success).unwrap();
        assert_eq!(success.len(), 1);
        assert_eq!(success[0].id, a.id);

        let failed = list_notes_with_status(&conn, NoteStatus::Failed).unwrap();
        assert!(failed.is_empty());
    }

    #[test]
    fn test_update_note_patches_only_named_fields() {
        let conn = create_test_conn();
        let note = insert_note(&conn, &new_note("body")).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let updated = update_note(
            &conn,
            note.id,
            &QueuedNotePatch {
                status: Some(NoteStatus::Pending),
                retry_count: Some(1),
                last_error: Some("connection timeout".to_string()),
                clear_last_error: false,
            },
        )
        .unwrap()
        .unwrap();

        assert_eq!(updated.retry_count, 1);
        assert_eq!(updated.last_error.as_deref(), Some("connection timeout"));
        assert!(updated.updated_at > note.updated_at);
        // Immutable fields are untouched
        assert_eq!(updated.content, "body");
        assert_eq!(updated.created_at, note.created_at);
    }

    #[test]
    fn test_update_note_clears_last_error() {
        let conn = create_test_conn();
        let note = insert_note(&conn, &new_note("body")).unwrap();

        update_note(
            &conn,
            note.id,
            &QueuedNotePatch {
                last_error: Some("boom".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let updated = update_note(
            &conn,
            note.id,
            &QueuedNotePatch {
                status: Some(NoteStatus::Success),
                clear_last_error: true,
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();

        assert_eq!(updated.status, NoteStatus::Success);
        assert!(updated.last_error.is_none());
    }

    #[test]
    fn test_update_note_missing_is_none() {
        let conn = create_test_conn();
        let result = update_note(
            &conn,
            999,
            &QueuedNotePatch {
                status: Some(NoteStatus::Failed),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_put_note_full_replace() {
        let conn = create_test_conn();
        let mut note = insert_note(&conn, &new_note("body")).unwrap();

        note.status = NoteStatus::Success;
        note.retry_count = 2;
        note.updated_at = note.updated_at - chrono::Duration::minutes(10);

        assert!(put_note(&conn, &note).unwrap());

        let fetched = get_note(&conn, note.id).unwrap().unwrap();
        assert_eq!(fetched.status, NoteStatus::Success);
        assert_eq!(fetched.retry_count, 2);
        // put preserves the caller's timestamps
        assert!(Utc::now() - fetched.updated_at >= chrono::Duration::minutes(9));
    }

    #[test]
    fn test_delete_note_idempotent() {
        let conn = create_test_conn();
        let note = insert_note(&conn, &new_note("body")).unwrap();

        assert!(delete_note(&conn, note.id).unwrap());
        assert!(!delete_note(&conn, note.id).unwrap());
        assert!(get_note(&conn, note.id).unwrap().is_none());
    }

    #[test]
    fn test_count_notes() {
        let conn = create_test_conn();
        assert_eq!(count_notes(&conn).unwrap(), 0);

        insert_note(&conn, &new_note("a")).unwrap();
        insert_note(&conn, &new_note("b")).unwrap();
        assert_eq!(count_notes(&conn).unwrap(), 2);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let conn = create_test_conn();
        let mut note = new_note("body");
        note.metadata
            .insert("template".to_string(), serde_json::json!("research"));
        note.metadata
            .insert("tags".to_string(), serde_json::json!(["web", "clip"]));

        let inserted = insert_note(&conn, &note).unwrap();
        let fetched = get_note(&conn, inserted.id).unwrap().unwrap();

        assert_eq!(
            fetched.metadata.get("template"),
            Some(&serde_json::json!("research"))
        );
        assert_eq!(
            fetched.metadata.get("tags"),
            Some(&serde_json::json!(["web", "clip"]))
        );
    }

    #[test]
    fn test_kind_stored_as_integer() {
        let conn = create_test_conn();
        let mut note = new_note("summary body");
        note.kind = NoteKind::Summary;
        let inserted = insert_note(&conn, &note).unwrap();

        let raw: i64 = conn
            .query_row(
                "SELECT kind FROM note_outbox WHERE id = ?1",
                params![inserted.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(raw, 2);
        assert_eq!(inserted.kind, NoteKind::Summary);
    }
}
