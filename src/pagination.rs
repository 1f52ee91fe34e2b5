//! Keyset pagination over one note partition.
//!
//! A page cursor carries the ordering-key value and id of the last note on
//! the previous page, so the next page never has to look that note up again.
//! Bare note ids from older clients are still accepted and resolved against
//! the store.

use crate::clock::{format_timestamp, parse_timestamp};
use crate::errors::{AppError, AppResult};
use crate::models::{Note, NotePartition};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 50;

const CURSOR_SEPARATOR: char = '|';

pub fn page_size(limit: Option<u32>, default_size: u32) -> u32 {
    limit.unwrap_or(default_size).clamp(1, MAX_PAGE_SIZE)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub partition: NotePartition,
    pub key: DateTime<Utc>,
    pub note_id: String,
}

impl PageCursor {
    pub fn after(note: &Note) -> Self {
        Self {
            partition: note.partition(),
            key: note.ordering_key(),
            note_id: note.id.clone(),
        }
    }

    pub fn encode(&self) -> String {
        let raw = format!(
            "{}{sep}{}{sep}{}",
            self.partition.as_str(),
            format_timestamp(self.key),
            self.note_id,
            sep = CURSOR_SEPARATOR
        );
        URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(token: &str) -> AppResult<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid_cursor())?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid_cursor())?;
        let mut parts = raw.splitn(3, CURSOR_SEPARATOR);
        let (Some(partition), Some(key), Some(note_id)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid_cursor());
        };
        let partition = NotePartition::parse(partition).ok_or_else(invalid_cursor)?;
        let key = parse_timestamp(key).map_err(|_| invalid_cursor())?;
        let note_id = Uuid::parse_str(note_id).map_err(|_| invalid_cursor())?.to_string();
        Ok(Self {
            partition,
            key,
            note_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorRequest {
    Token(PageCursor),
    /// Id of the last note seen; its key is read back from the store.
    NoteId(String),
}

/// The strict lower bound a page query continues from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysetBound {
    pub key: DateTime<Utc>,
    pub note_id: String,
}

pub fn parse_cursor(cursor: Option<&str>, partition: NotePartition) -> AppResult<Option<CursorRequest>> {
    let Some(raw) = cursor.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if let Ok(id) = Uuid::parse_str(raw) {
        return Ok(Some(CursorRequest::NoteId(id.to_string())));
    }
    let token = PageCursor::decode(raw)?;
    if token.partition != partition {
        return Err(AppError::Validation(format!(
            "invalid cursor: issued for the {} view",
            token.partition.as_str()
        )));
    }
    Ok(Some(CursorRequest::Token(token)))
}

/// Trims the probe row fetched past `size` and derives the next cursor.
pub fn finish_page(mut notes: Vec<Note>, size: u32) -> (Vec<Note>, Option<String>) {
    let size = size as usize;
    if notes.len() <= size {
        return (notes, None);
    }
    notes.truncate(size);
    let next_cursor = notes.last().map(|note| PageCursor::after(note).encode());
    (notes, next_cursor)
}

fn invalid_cursor() -> AppError {
    AppError::Validation("invalid cursor".to_string())
}
