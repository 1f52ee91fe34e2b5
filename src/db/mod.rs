use crate::clock::{format_timestamp, parse_timestamp};
use crate::errors::{AppError, AppResult};
use crate::models::{Note, NoteCounts, NotePartition};
use crate::pagination::{CursorRequest, KeysetBound};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const NOTE_COLUMNS: &str = "id, owner_id, title, content_json, created_at, updated_at, deleted_at";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;
        tracing::debug!(path = %path.display(), journal_mode = %journal_mode, "note database opened");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn insert_note(
        &self,
        owner_id: &str,
        title: &str,
        content: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> AppResult<Note> {
        let id = Uuid::new_v4().to_string();
        let content_json = content.map(serde_json::to_string).transpose()?;
        let stamp = format_timestamp(now);

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notes (id, owner_id, title, content_json, created_at, updated_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, NULL)",
            params![id, owner_id, title, content_json, stamp],
        )?;

        Ok(Note {
            id,
            title: title.to_string(),
            content: content.cloned(),
            owner_id: owner_id.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    pub fn get_note(&self, note_id: &str, owner_id: &str) -> AppResult<Option<Note>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1 AND owner_id = ?2"),
            params![note_id, owner_id],
            parse_note_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// `content` of `Some(None)` clears the stored document.
    pub fn update_note(
        &self,
        note_id: &str,
        owner_id: &str,
        title: Option<&str>,
        content: Option<Option<&serde_json::Value>>,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Note>> {
        let replace_content = content.is_some();
        let content_json = content.flatten().map(serde_json::to_string).transpose()?;

        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "UPDATE notes
                 SET title = COALESCE(?1, title),
                     content_json = CASE WHEN ?2 THEN ?3 ELSE content_json END,
                     updated_at = ?4
                 WHERE id = ?5 AND owner_id = ?6
                 RETURNING {NOTE_COLUMNS}"
            ),
            params![title, replace_content, content_json, format_timestamp(now), note_id, owner_id],
            parse_note_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Re-stamps `deleted_at` when the note is already in the trash.
    pub fn soft_delete_note(&self, note_id: &str, owner_id: &str, now: DateTime<Utc>) -> AppResult<Option<Note>> {
        let stamp = format_timestamp(now);
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "UPDATE notes
                 SET deleted_at = MAX(created_at, ?1), updated_at = ?1
                 WHERE id = ?2 AND owner_id = ?3
                 RETURNING {NOTE_COLUMNS}"
            ),
            params![stamp, note_id, owner_id],
            parse_note_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Returns `None` unless the note exists, is owned and is in the trash.
    pub fn restore_note(&self, note_id: &str, owner_id: &str, now: DateTime<Utc>) -> AppResult<Option<Note>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "UPDATE notes
                 SET deleted_at = NULL, updated_at = ?1
                 WHERE id = ?2 AND owner_id = ?3 AND deleted_at IS NOT NULL
                 RETURNING {NOTE_COLUMNS}"
            ),
            params![format_timestamp(now), note_id, owner_id],
            parse_note_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Restores every owned, trashed note among `note_ids` in one statement
    /// and returns the ids it touched, in no particular order. The ids are
    /// bound as a single JSON array, so batch size is not limited by SQLite's
    /// bound-parameter cap.
    pub fn restore_notes(&self, note_ids: &[String], owner_id: &str, now: DateTime<Utc>) -> AppResult<Vec<String>> {
        if note_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids_json = serde_json::to_string(note_ids)?;
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "UPDATE notes
             SET deleted_at = NULL, updated_at = ?1
             WHERE owner_id = ?2
               AND deleted_at IS NOT NULL
               AND id IN (SELECT value FROM json_each(?3))
             RETURNING id",
        )?;
        let restored = statement
            .query_map(params![format_timestamp(now), owner_id, ids_json], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(restored)
    }

    /// Fetches up to `fetch_limit` notes of one partition, newest first by the
    /// partition's ordering key, strictly after `cursor` when one is given.
    pub fn list_notes(
        &self,
        owner_id: &str,
        partition: NotePartition,
        cursor: Option<&CursorRequest>,
        fetch_limit: u32,
    ) -> AppResult<Vec<Note>> {
        let conn = self.lock()?;

        let bound = match cursor {
            Some(CursorRequest::Token(token)) => Some(KeysetBound {
                key: token.key,
                note_id: token.note_id.clone(),
            }),
            Some(CursorRequest::NoteId(note_id)) => resolve_cursor_row(&conn, owner_id, partition, note_id)?,
            None => None,
        };

        let column = partition.ordering_column();
        let mut query = format!(
            "SELECT {NOTE_COLUMNS} FROM notes WHERE owner_id = ? AND {}",
            partition.predicate()
        );
        let mut params_vec: Vec<String> = vec![owner_id.to_string()];

        if let Some(bound) = &bound {
            query.push_str(&format!(" AND ({column} < ? OR ({column} = ? AND id < ?))"));
            let key = format_timestamp(bound.key);
            params_vec.push(key.clone());
            params_vec.push(key);
            params_vec.push(bound.note_id.clone());
        }

        query.push_str(&format!(" ORDER BY {column} DESC, id DESC LIMIT ?"));

        let mut statement = conn.prepare(&query)?;
        let mut dyn_params: Vec<&dyn rusqlite::ToSql> = params_vec
            .iter()
            .map(|param| param as &dyn rusqlite::ToSql)
            .collect();
        dyn_params.push(&fetch_limit);

        let rows = statement.query_map(rusqlite::params_from_iter(dyn_params), parse_note_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn count_notes(&self, owner_id: &str) -> AppResult<NoteCounts> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT deleted_at IS NOT NULL AS trashed, COUNT(*)
             FROM notes WHERE owner_id = ?1
             GROUP BY trashed",
        )?;
        let mut rows = statement.query([owner_id])?;
        let mut counts = NoteCounts::default();
        while let Some(row) = rows.next()? {
            let trashed: bool = row.get(0)?;
            let count: i64 = row.get(1)?;
            let count = u64::try_from(count).unwrap_or_default();
            if trashed {
                counts.deleted = count;
            } else {
                counts.active = count;
            }
        }
        Ok(counts)
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }
}

/// Reads back the ordering key of the note a bare-id cursor points at. A note
/// that no longer has a key in `partition` yields no bound.
fn resolve_cursor_row(
    conn: &Connection,
    owner_id: &str,
    partition: NotePartition,
    note_id: &str,
) -> AppResult<Option<KeysetBound>> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT created_at, deleted_at FROM notes WHERE id = ?1 AND owner_id = ?2",
            params![note_id, owner_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((created_at, deleted_at)) = row else {
        tracing::debug!(note_id = %note_id, "cursor note not found, restarting from the top");
        return Ok(None);
    };
    let raw_key = match partition {
        NotePartition::Active => Some(created_at),
        NotePartition::Deleted => deleted_at,
    };
    let Some(raw_key) = raw_key else {
        tracing::debug!(note_id = %note_id, "cursor note left the trash, restarting from the top");
        return Ok(None);
    };
    let key = parse_time(&raw_key)?;
    Ok(Some(KeysetBound {
        key,
        note_id: note_id.to_string(),
    }))
}

fn parse_note_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        content: row
            .get::<_, Option<String>>(3)?
            .map(|raw| parse_content(&raw))
            .transpose()?,
        created_at: parse_time(&row.get::<_, String>(4)?)?,
        updated_at: parse_time(&row.get::<_, String>(5)?)?,
        deleted_at: row
            .get::<_, Option<String>>(6)?
            .map(|raw| parse_time(&raw))
            .transpose()?,
    })
}

fn parse_content(raw: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(error))
    })
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    parse_timestamp(raw).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
        )
    })
}
