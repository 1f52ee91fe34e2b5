//! Line-delimited JSON invoke channel: one request object per input line,
//! one response object per output line, in order.

use crate::commands::{invoke, ClientError};
use crate::errors::AppResult;
use crate::notes::NotesCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct InvokeRequest {
    #[serde(default)]
    request_id: Option<String>,
    owner_id: String,
    command: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvokeResponse {
    request_id: Option<String>,
    ok: bool,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ClientError>,
}

impl InvokeResponse {
    fn success(request_id: Option<String>, status: u16, data: Value) -> Self {
        Self {
            request_id,
            ok: true,
            status,
            data: Some(data),
            error: None,
        }
    }

    fn failure(request_id: Option<String>, error: ClientError) -> Self {
        Self {
            request_id,
            ok: false,
            status: error.status,
            data: None,
            error: Some(error),
        }
    }
}

/// Serves requests until `reader` hits EOF and returns how many were answered.
pub async fn serve<R, W>(core: Arc<NotesCore>, reader: R, mut writer: W) -> AppResult<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut answered = 0u64;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&core, &line).await;
        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await?;
        answered += 1;
    }
    tracing::info!(answered, "invoke channel closed");
    Ok(answered)
}

async fn handle_line(core: &Arc<NotesCore>, line: &str) -> InvokeResponse {
    let raw: Value = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(error) => return malformed(None, error),
    };
    // Echo the id even when the rest of the request is rejected.
    let echoed_id = raw.get("requestId").and_then(Value::as_str).map(str::to_string);
    let request: InvokeRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(error) => return malformed(echoed_id, error),
    };

    let InvokeRequest {
        request_id,
        owner_id,
        command,
        payload,
    } = request;
    let core = core.clone();
    // SQLite calls block; keep them off the async workers.
    let outcome = tokio::task::spawn_blocking(move || invoke(&core, &owner_id, &command, payload)).await;

    match outcome {
        Ok(Ok(output)) => InvokeResponse::success(request_id, output.status, output.data),
        Ok(Err(error)) => InvokeResponse::failure(request_id, error),
        Err(join_error) => {
            tracing::error!(error = %join_error, "invoke task failed");
            InvokeResponse::failure(
                request_id,
                ClientError {
                    status: 500,
                    code: "INTERNAL".to_string(),
                    message: "internal error".to_string(),
                },
            )
        }
    }
}

fn malformed(request_id: Option<String>, error: serde_json::Error) -> InvokeResponse {
    tracing::debug!(error = %error, "malformed invoke request");
    InvokeResponse::failure(
        request_id,
        ClientError {
            status: 400,
            code: "VALIDATION_ERROR".to_string(),
            message: format!("malformed request: {}", error),
        },
    )
}
