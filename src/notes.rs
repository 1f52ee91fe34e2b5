use crate::clock;
use crate::config::AppConfig;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{
    BulkRestorePayload, BulkRestoreResponse, CreateNotePayload, ListNotesRequest, Note, NoteCounts, NotePage,
    NotePartition, UpdateNotePayload,
};
use crate::pagination::{finish_page, page_size, parse_cursor, DEFAULT_PAGE_SIZE};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

const MAX_TITLE_CHARS: usize = 500;

/// Note operations on behalf of an explicit owner. Holds no per-request state.
#[derive(Clone)]
pub struct NotesCore {
    db: Arc<Database>,
    default_page_size: u32,
}

impl NotesCore {
    pub fn new(config: &AppConfig) -> AppResult<Arc<Self>> {
        let db = Database::new(&config.database_path())?;
        tracing::info!(path = %db.path().display(), "note store ready");
        Ok(Arc::new(Self {
            db: Arc::new(db),
            default_page_size: page_size(Some(config.default_page_size), DEFAULT_PAGE_SIZE),
        }))
    }

    pub fn open(db_path: &Path) -> AppResult<Arc<Self>> {
        Ok(Arc::new(Self {
            db: Arc::new(Database::new(db_path)?),
            default_page_size: DEFAULT_PAGE_SIZE,
        }))
    }

    pub fn create_note(&self, owner_id: &str, payload: CreateNotePayload) -> AppResult<Note> {
        let owner_id = require_owner(owner_id)?;
        let title = normalize_title(payload.title.as_deref())?;
        let note = self
            .db
            .insert_note(owner_id, &title, payload.content.as_ref(), clock::now())?;
        tracing::info!(note_id = %note.id, owner_id = %owner_id, "note created");
        Ok(note)
    }

    pub fn get_note(&self, owner_id: &str, note_id: &str) -> AppResult<Note> {
        let owner_id = require_owner(owner_id)?;
        let Some(note_id) = parse_note_id(note_id) else {
            return Err(AppError::note_not_found());
        };
        tracing::debug!(note_id = %note_id, owner_id = %owner_id, "loading note");
        self.db
            .get_note(&note_id, owner_id)?
            .ok_or_else(AppError::note_not_found)
    }

    pub fn update_note(&self, owner_id: &str, payload: UpdateNotePayload) -> AppResult<Note> {
        let owner_id = require_owner(owner_id)?;
        if payload.title.is_none() && payload.content.is_none() {
            return Err(AppError::Validation("nothing to update: provide title or content".to_string()));
        }
        let title = payload
            .title
            .as_deref()
            .map(|raw| normalize_title(Some(raw)))
            .transpose()?;
        let Some(note_id) = parse_note_id(&payload.id) else {
            return Err(AppError::note_not_found());
        };
        let content = payload.content.as_ref().map(Option::as_ref);

        let note = self
            .db
            .update_note(&note_id, owner_id, title.as_deref(), content, clock::now())?
            .ok_or_else(AppError::note_not_found)?;
        tracing::info!(note_id = %note.id, owner_id = %owner_id, "note updated");
        Ok(note)
    }

    pub fn soft_delete_note(&self, owner_id: &str, note_id: &str) -> AppResult<Note> {
        let owner_id = require_owner(owner_id)?;
        let Some(note_id) = parse_note_id(note_id) else {
            return Err(AppError::note_not_found());
        };
        let note = self
            .db
            .soft_delete_note(&note_id, owner_id, clock::now())?
            .ok_or_else(AppError::note_not_found)?;
        tracing::info!(note_id = %note.id, owner_id = %owner_id, "note moved to trash");
        Ok(note)
    }

    /// Fails with `NotFound` for notes that are not currently in the trash.
    pub fn restore_note(&self, owner_id: &str, note_id: &str) -> AppResult<Note> {
        let owner_id = require_owner(owner_id)?;
        let Some(note_id) = parse_note_id(note_id) else {
            return Err(AppError::note_not_found());
        };
        let note = self
            .db
            .restore_note(&note_id, owner_id, clock::now())?
            .ok_or_else(AppError::note_not_found)?;
        tracing::info!(note_id = %note.id, owner_id = %owner_id, "note restored");
        Ok(note)
    }

    /// Ids that are foreign, missing or already active are skipped.
    pub fn bulk_restore_notes(&self, owner_id: &str, payload: BulkRestorePayload) -> AppResult<BulkRestoreResponse> {
        let owner_id = require_owner(owner_id)?;
        if payload.ids.is_empty() {
            return Err(AppError::Validation("ids must not be empty".to_string()));
        }

        let mut requested = Vec::with_capacity(payload.ids.len());
        let mut seen = HashSet::new();
        for raw in &payload.ids {
            let Some(note_id) = parse_note_id(raw) else {
                return Err(AppError::Validation(format!("'{}' is not a note id", raw)));
            };
            if seen.insert(note_id.clone()) {
                requested.push(note_id);
            }
        }

        let restored: HashSet<String> = self
            .db
            .restore_notes(&requested, owner_id, clock::now())?
            .into_iter()
            .collect();
        let restored_ids: Vec<String> = requested.into_iter().filter(|id| restored.contains(id)).collect();

        tracing::info!(
            owner_id = %owner_id,
            requested = payload.ids.len(),
            restored = restored_ids.len(),
            "bulk restore finished"
        );
        Ok(BulkRestoreResponse {
            restored_count: restored_ids.len(),
            restored_ids,
        })
    }

    pub fn list_notes(&self, owner_id: &str, request: ListNotesRequest) -> AppResult<NotePage> {
        let owner_id = require_owner(owner_id)?;
        let partition = NotePartition::from_deleted_flag(request.deleted.unwrap_or(false));
        let size = page_size(request.limit, self.default_page_size);
        let cursor = parse_cursor(request.cursor.as_deref(), partition)?;

        let fetched = self.db.list_notes(owner_id, partition, cursor.as_ref(), size + 1)?;
        let (notes, next_cursor) = finish_page(fetched, size);
        tracing::debug!(
            owner_id = %owner_id,
            partition = partition.as_str(),
            returned = notes.len(),
            has_more = next_cursor.is_some(),
            "listed notes"
        );
        Ok(NotePage { notes, next_cursor })
    }

    pub fn count_notes(&self, owner_id: &str) -> AppResult<NoteCounts> {
        let owner_id = require_owner(owner_id)?;
        self.db.count_notes(owner_id)
    }
}

/// Owner ids are opaque: only blank ones are rejected, nothing is normalized.
fn require_owner(owner_id: &str) -> AppResult<&str> {
    if owner_id.trim().is_empty() {
        return Err(AppError::Validation("ownerId is required".to_string()));
    }
    Ok(owner_id)
}

fn normalize_title(raw: Option<&str>) -> AppResult<String> {
    let title = raw.unwrap_or_default().trim();
    if title.is_empty() {
        return Err(AppError::Validation("title is required".to_string()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(AppError::Validation(format!(
            "title must be at most {} characters",
            MAX_TITLE_CHARS
        )));
    }
    Ok(title.to_string())
}

/// A string that is not a UUID cannot name any stored note.
fn parse_note_id(raw: &str) -> Option<String> {
    Uuid::parse_str(raw.trim()).ok().map(|id| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::NotesCore;
    use crate::errors::AppError;
    use crate::models::{BulkRestorePayload, CreateNotePayload, ListNotesRequest, UpdateNotePayload};
    use std::sync::Arc;

    fn core(dir: &tempfile::TempDir) -> Arc<NotesCore> {
        NotesCore::open(&dir.path().join("notes.sqlite")).expect("core")
    }

    fn create(core: &NotesCore, owner: &str, title: &str) -> crate::models::Note {
        core.create_note(
            owner,
            CreateNotePayload {
                title: Some(title.to_string()),
                content: Some(serde_json::json!({ "text": title })),
            },
        )
        .expect("create note")
    }

    #[test]
    fn create_rejects_blank_titles_and_starts_active() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core(&dir);

        let missing = core.create_note("owner-a", CreateNotePayload::default());
        assert!(matches!(missing, Err(AppError::Validation(_))));
        let blank = core.create_note(
            "owner-a",
            CreateNotePayload {
                title: Some("   ".to_string()),
                content: None,
            },
        );
        assert!(matches!(blank, Err(AppError::Validation(_))));

        let note = create(&core, "owner-a", "  Trimmed  ");
        assert_eq!(note.title, "Trimmed");
        assert!(note.deleted_at.is_none());
    }

    #[test]
    fn soft_delete_keeps_document_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core(&dir);
        let note = create(&core, "owner-a", "A");

        let trashed = core.soft_delete_note("owner-a", &note.id).expect("soft delete");
        let deleted_at = trashed.deleted_at.expect("deleted_at set");
        assert!(deleted_at >= trashed.created_at);
        assert_eq!(trashed.title, note.title);
        assert_eq!(trashed.content, note.content);
        assert_eq!(trashed.created_at, note.created_at);
        assert_eq!(trashed.owner_id, note.owner_id);
    }

    #[test]
    fn restore_round_trip_only_changes_updated_at() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core(&dir);
        let note = create(&core, "owner-a", "Round trip");

        core.soft_delete_note("owner-a", &note.id).expect("soft delete");
        let restored = core.restore_note("owner-a", &note.id).expect("restore");
        assert!(restored.updated_at >= note.updated_at);

        let mut expected = note.clone();
        expected.updated_at = restored.updated_at;
        assert_eq!(restored, expected);
    }

    #[test]
    fn restore_of_active_note_is_not_found_and_mutates_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core(&dir);
        let note = create(&core, "owner-a", "Active");

        let result = core.restore_note("owner-a", &note.id);
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(core.get_note("owner-a", &note.id).expect("get"), note);
    }

    #[test]
    fn foreign_and_missing_notes_look_identical() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core(&dir);
        let note = create(&core, "owner-a", "Private");
        let missing_id = uuid::Uuid::new_v4().to_string();

        for id in [note.id.as_str(), missing_id.as_str(), "not-a-uuid"] {
            let get = core.get_note("owner-b", id).expect_err("get");
            let delete = core.soft_delete_note("owner-b", id).expect_err("delete");
            let restore = core.restore_note("owner-b", id).expect_err("restore");
            for error in [get, delete, restore] {
                assert_eq!(error.to_string(), AppError::note_not_found().to_string());
            }
        }
        assert!(core.get_note("owner-a", &note.id).expect("owner get").deleted_at.is_none());
    }

    #[test]
    fn update_requires_a_field_and_respects_ownership() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core(&dir);
        let note = create(&core, "owner-a", "Before");

        let empty = core.update_note(
            "owner-a",
            UpdateNotePayload {
                id: note.id.clone(),
                ..UpdateNotePayload::default()
            },
        );
        assert!(matches!(empty, Err(AppError::Validation(_))));

        let foreign = core.update_note(
            "owner-b",
            UpdateNotePayload {
                id: note.id.clone(),
                title: Some("Hijacked".to_string()),
                content: None,
            },
        );
        assert!(matches!(foreign, Err(AppError::NotFound(_))));

        let updated = core
            .update_note(
                "owner-a",
                UpdateNotePayload {
                    id: note.id.clone(),
                    title: Some("After".to_string()),
                    content: None,
                },
            )
            .expect("update");
        assert_eq!(updated.title, "After");
        assert_eq!(updated.content, note.content);
        assert!(updated.deleted_at.is_none());
    }

    #[test]
    fn bulk_restore_mixed_batch_restores_only_owned_trash() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core(&dir);
        let a = create(&core, "owner-a", "a");
        let b = create(&core, "owner-a", "b");
        let c = create(&core, "owner-b", "c");
        core.soft_delete_note("owner-a", &a.id).expect("delete a");
        core.soft_delete_note("owner-b", &c.id).expect("delete c");

        let response = core
            .bulk_restore_notes(
                "owner-a",
                BulkRestorePayload {
                    ids: vec![a.id.clone(), b.id.clone(), c.id.clone(), a.id.clone()],
                },
            )
            .expect("bulk restore");
        assert_eq!(response.restored_count, 1);
        assert_eq!(response.restored_ids, vec![a.id.clone()]);
        assert!(core.get_note("owner-b", &c.id).expect("c").deleted_at.is_some());

        let again = core
            .bulk_restore_notes("owner-a", BulkRestorePayload { ids: vec![a.id.clone()] })
            .expect("nothing left to restore");
        assert_eq!(again.restored_count, 0);
    }

    #[test]
    fn bulk_restore_rejects_empty_and_malformed_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core(&dir);
        let a = create(&core, "owner-a", "a");

        let empty = core.bulk_restore_notes("owner-a", BulkRestorePayload { ids: vec![] });
        assert!(matches!(empty, Err(AppError::Validation(_))));
        let malformed = core.bulk_restore_notes(
            "owner-a",
            BulkRestorePayload {
                ids: vec![a.id.clone(), "42".to_string()],
            },
        );
        assert!(matches!(malformed, Err(AppError::Validation(_))));
    }

    #[test]
    fn blank_owner_is_rejected_before_the_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core(&dir);
        let result = core.list_notes(" ", ListNotesRequest::default());
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn owner_ids_are_matched_exactly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core(&dir);
        let note = create(&core, "alice", "secret");

        for owner in [" alice ", "alice ", "Alice"] {
            assert!(matches!(core.get_note(owner, &note.id), Err(AppError::NotFound(_))));
            assert!(matches!(core.soft_delete_note(owner, &note.id), Err(AppError::NotFound(_))));
        }
        assert_eq!(core.count_notes(" alice ").expect("padded owner counts").active, 0);
        assert!(core.get_note("alice", &note.id).expect("owner get").deleted_at.is_none());
    }

    #[test]
    fn title_length_limit_applies_to_create_and_update() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core(&dir);
        let at_limit = "t".repeat(500);
        let over_limit = "t".repeat(501);

        let note = create(&core, "owner-a", &at_limit);
        assert_eq!(note.title.chars().count(), 500);
        let too_long = core.create_note(
            "owner-a",
            CreateNotePayload {
                title: Some(over_limit.clone()),
                content: None,
            },
        );
        assert!(matches!(too_long, Err(AppError::Validation(_))));

        let multibyte = "é".repeat(500);
        let updated = core
            .update_note(
                "owner-a",
                UpdateNotePayload {
                    id: note.id.clone(),
                    title: Some(multibyte.clone()),
                    content: None,
                },
            )
            .expect("500 characters fit");
        assert_eq!(updated.title, multibyte);
        let rejected = core.update_note(
            "owner-a",
            UpdateNotePayload {
                id: note.id.clone(),
                title: Some(over_limit),
                content: None,
            },
        );
        assert!(matches!(rejected, Err(AppError::Validation(_))));
        assert_eq!(core.get_note("owner-a", &note.id).expect("unchanged").title, multibyte);
    }

    #[test]
    fn large_bulk_restore_batches_succeed_with_a_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core(&dir);
        let trashed = create(&core, "owner-a", "in the trash");
        core.soft_delete_note("owner-a", &trashed.id).expect("delete");

        let mut ids: Vec<String> = (0..40_000).map(|_| uuid::Uuid::new_v4().to_string()).collect();
        ids.push(trashed.id.clone());
        let response = core
            .bulk_restore_notes("owner-a", BulkRestorePayload { ids })
            .expect("large batch");
        assert_eq!(response.restored_count, 1);
        assert_eq!(response.restored_ids, vec![trashed.id.clone()]);
    }

    #[test]
    fn concurrent_restores_let_exactly_one_win() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core(&dir);
        let note = create(&core, "owner-a", "Contested");
        core.soft_delete_note("owner-a", &note.id).expect("delete");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let core = core.clone();
                let id = note.id.clone();
                std::thread::spawn(move || core.restore_note("owner-a", &id).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }
}
