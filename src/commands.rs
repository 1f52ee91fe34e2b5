use crate::errors::{AppError, AppResult};
use crate::models::{BulkRestorePayload, CreateNotePayload, ListNotesRequest, NoteIdPayload, UpdateNotePayload};
use crate::notes::NotesCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum NoteCommand {
    CreateNote(CreateNotePayload),
    ListNotes(ListNotesRequest),
    GetNote(NoteIdPayload),
    UpdateNote(UpdateNotePayload),
    SoftDeleteNote(NoteIdPayload),
    RestoreNote(NoteIdPayload),
    BulkRestoreNotes(BulkRestorePayload),
    CountNotes,
}

impl NoteCommand {
    /// A missing or null payload counts as an empty object.
    pub fn parse(command: &str, payload: Value) -> AppResult<Self> {
        let payload = match payload {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };
        match command {
            "createNote" => deserialize_payload(payload, command).map(Self::CreateNote),
            "listNotes" => deserialize_payload(payload, command).map(Self::ListNotes),
            "getNote" => deserialize_payload(payload, command).map(Self::GetNote),
            "updateNote" => deserialize_payload(payload, command).map(Self::UpdateNote),
            "softDeleteNote" => deserialize_payload(payload, command).map(Self::SoftDeleteNote),
            "restoreNote" => deserialize_payload(payload, command).map(Self::RestoreNote),
            "bulkRestoreNotes" => deserialize_payload(payload, command).map(Self::BulkRestoreNotes),
            "countNotes" => match payload {
                Value::Object(map) if map.is_empty() => Ok(Self::CountNotes),
                _ => Err(AppError::Validation("countNotes takes no payload".to_string())),
            },
            other => Err(AppError::Validation(format!("unknown command '{}'", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateNote(_) => "createNote",
            Self::ListNotes(_) => "listNotes",
            Self::GetNote(_) => "getNote",
            Self::UpdateNote(_) => "updateNote",
            Self::SoftDeleteNote(_) => "softDeleteNote",
            Self::RestoreNote(_) => "restoreNote",
            Self::BulkRestoreNotes(_) => "bulkRestoreNotes",
            Self::CountNotes => "countNotes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub status: u16,
    pub data: Value,
}

/// What a caller may see of an error: no internals for server-side failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientError {
    #[serde(skip)]
    pub status: u16,
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ClientError {
    fn from(error: &AppError) -> Self {
        let message = match error {
            AppError::Validation(detail) | AppError::NotFound(detail) => detail.clone(),
            AppError::Io(_) | AppError::Internal(_) => "internal error".to_string(),
        };
        Self {
            status: error.status(),
            code: error.code().to_string(),
            message,
        }
    }
}

pub fn dispatch(core: &NotesCore, owner_id: &str, command: NoteCommand) -> AppResult<CommandOutput> {
    tracing::trace!(command = command.name(), owner_id = %owner_id, "dispatching command");
    let (status, data) = match command {
        NoteCommand::CreateNote(payload) => (201, serde_json::to_value(core.create_note(owner_id, payload)?)?),
        NoteCommand::ListNotes(request) => (200, serde_json::to_value(core.list_notes(owner_id, request)?)?),
        NoteCommand::GetNote(payload) => (200, serde_json::to_value(core.get_note(owner_id, &payload.id)?)?),
        NoteCommand::UpdateNote(payload) => (200, serde_json::to_value(core.update_note(owner_id, payload)?)?),
        NoteCommand::SoftDeleteNote(payload) => {
            (200, serde_json::to_value(core.soft_delete_note(owner_id, &payload.id)?)?)
        }
        NoteCommand::RestoreNote(payload) => (200, serde_json::to_value(core.restore_note(owner_id, &payload.id)?)?),
        NoteCommand::BulkRestoreNotes(payload) => {
            (200, serde_json::to_value(core.bulk_restore_notes(owner_id, payload)?)?)
        }
        NoteCommand::CountNotes => (200, serde_json::to_value(core.count_notes(owner_id)?)?),
    };
    Ok(CommandOutput { status, data })
}

/// Parses, runs and maps one command to its client-facing result.
pub fn invoke(core: &NotesCore, owner_id: &str, command: &str, payload: Value) -> Result<CommandOutput, ClientError> {
    let result = NoteCommand::parse(command, payload).and_then(|parsed| dispatch(core, owner_id, parsed));
    result.map_err(|error| {
        match &error {
            AppError::Io(_) | AppError::Internal(_) => {
                tracing::error!(command = %command, error = %error, "command failed");
            }
            AppError::Validation(_) | AppError::NotFound(_) => {
                tracing::debug!(command = %command, error = %error, "command rejected");
            }
        }
        ClientError::from(&error)
    })
}

fn deserialize_payload<T: DeserializeOwned>(value: Value, command: &str) -> AppResult<T> {
    serde_json::from_value(value)
        .map_err(|error| AppError::Validation(format!("invalid {} payload: {}", command, error)))
}
