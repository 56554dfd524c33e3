use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use loreforge_common::{
    FileRecord, FileStatus, LoreforgeError, Notification, NotificationType, UploadPart,
};
use loreforge_upload::actor::new_session_id;
use loreforge_upload::CreateUploadSession;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadBody {
    pub file_key: String,
    pub filename: String,
    pub file_size: i64,
    pub total_parts: i32,
}

/// `POST /uploads` — open a multipart upload session and register the file
/// row in `uploading` state.
pub async fn create(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<CreateUploadBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.file_key.is_empty() || body.filename.is_empty() {
        return Err(LoreforgeError::Validation("fileKey and filename are required".to_string()).into());
    }

    let session_id = new_session_id();
    let handle = state.uploads.get_or_spawn(&session_id).await;
    let session = handle
        .create(CreateUploadSession {
            owner_id: user_id.clone(),
            file_key: body.file_key.clone(),
            upload_id: Uuid::new_v4().to_string(),
            filename: body.filename.clone(),
            file_size: body.file_size,
            total_parts: body.total_parts,
        })
        .await?;

    let now = Utc::now();
    state
        .files
        .create(&FileRecord {
            id: Uuid::new_v4().to_string(),
            owner_id: user_id,
            key: body.file_key,
            name: body.filename,
            size: body.file_size,
            status: FileStatus::Uploading,
            created_at: now,
            updated_at: now,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "session": session }))))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let handle = state.uploads.get_or_spawn(&session_id).await;
    let session = handle.get().await?;
    if session.owner_id != user_id {
        return Err(LoreforgeError::NotFound(format!("upload session {session_id}")).into());
    }
    Ok(Json(json!({ "session": session })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPartBody {
    pub part_number: i32,
    pub etag: String,
    pub size: i64,
}

pub async fn add_part(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(session_id): Path<String>,
    Json(body): Json<AddPartBody>,
) -> Result<Json<Value>, ApiError> {
    let handle = state.uploads.get_or_spawn(&session_id).await;
    let session = handle.get().await?;
    if session.owner_id != user_id {
        return Err(LoreforgeError::NotFound(format!("upload session {session_id}")).into());
    }

    let session = handle
        .add_part(UploadPart {
            part_number: body.part_number,
            etag: body.etag,
            size: body.size,
        })
        .await?;
    Ok(Json(json!({ "session": session })))
}

/// `POST /uploads/:id/complete` — requires every part acked; flips the file
/// to `uploaded` and notifies the owner.
pub async fn complete(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let handle = state.uploads.get_or_spawn(&session_id).await;
    let existing = handle.get().await?;
    if existing.owner_id != user_id {
        return Err(LoreforgeError::NotFound(format!("upload session {session_id}")).into());
    }

    let session = handle.complete().await?;
    state
        .files
        .set_status(&session.file_key, FileStatus::Uploaded)
        .await?;
    state
        .publish(
            &user_id,
            Notification::new(
                NotificationType::FileUploaded,
                "File uploaded",
                session.filename.clone(),
            )
            .with_data(json!({ "fileKey": session.file_key })),
        )
        .await;

    Ok(Json(json!({ "session": session })))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let handle = state.uploads.get_or_spawn(&session_id).await;
    let session = handle.get().await?;
    if session.owner_id != user_id {
        return Err(LoreforgeError::NotFound(format!("upload session {session_id}")).into());
    }
    handle.delete().await?;
    state.uploads.remove(&session_id).await;
    Ok(Json(json!({ "deleted": session_id })))
}

#[derive(Deserialize)]
pub struct FileStatusBody {
    pub status: String,
}

/// `POST /files/:key/status` — indexer callback. Updates the row and emits a
/// hidden `file_status_updated` the UI applies in place.
pub async fn set_file_status(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(file_key): Path<String>,
    Json(body): Json<FileStatusBody>,
) -> Result<Json<Value>, ApiError> {
    let status: FileStatus = body
        .status
        .parse()
        .map_err(LoreforgeError::Validation)?;
    let file = state
        .files
        .get_by_key(&file_key)
        .await?
        .ok_or_else(|| ApiError(LoreforgeError::NotFound(format!("file {file_key}"))))?;
    if file.owner_id != user_id {
        return Err(LoreforgeError::NotFound(format!("file {file_key}")).into());
    }

    state.files.set_status(&file_key, status).await?;
    state
        .publish(
            &user_id,
            Notification::new(
                NotificationType::FileStatusUpdated,
                "File status updated",
                format!("{} is now {status}", file.name),
            )
            .with_data(json!({ "fileKey": file_key, "status": status.to_string(), "hidden": true })),
        )
        .await;

    Ok(Json(json!({ "fileKey": file_key, "status": status })))
}
