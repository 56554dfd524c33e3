use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use loreforge_common::{
    FileStatus, LoreforgeError, Notification, NotificationType, ResourceRef,
};
use loreforge_extract::ExtractionTask;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::rest::campaigns::owned_campaign;
use crate::AppState;

/// `POST /campaigns/:id/resource` — attach a completed file to a campaign.
///
/// Idempotent: 201 on first attach, 200 with the existing row on repeats.
/// A file that is not `completed` yet gets 400 with `reindexTriggered` and a
/// kicked-off reindex so the client can retry after the next
/// `file_status_updated`.
pub async fn attach(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(campaign_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<axum::response::Response, ApiError> {
    let campaign = owned_campaign(&state, &user_id, &campaign_id).await?;
    let resource_ref = ResourceRef::from_value(&body)?;

    let file = state
        .files
        .get_by_key(&resource_ref.file_key)
        .await?
        .ok_or_else(|| {
            ApiError(LoreforgeError::NotFound(format!(
                "file {}",
                resource_ref.file_key
            )))
        })?;
    if file.owner_id != user_id {
        return Err(LoreforgeError::NotFound(format!("file {}", file.key)).into());
    }

    if file.status != FileStatus::Completed {
        // Kick the indexer and tell the client to wait for the status event.
        state.files.set_status(&file.key, FileStatus::Indexing).await?;
        state
            .publish(
                &user_id,
                Notification::new(
                    NotificationType::FileStatusUpdated,
                    "Re-indexing",
                    format!("{} is not ready yet", file.name),
                )
                .with_data(json!({ "fileKey": file.key, "status": "indexing", "hidden": true })),
            )
            .await;
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": format!("file {} is not indexed yet", file.key),
                "reindexTriggered": true,
            })),
        )
            .into_response());
    }

    let file_name = resource_ref.name.unwrap_or_else(|| file.name.clone());
    let (resource, created) = state
        .resources
        .attach(&campaign_id, &resource_ref.file_key, &file_name)
        .await?;

    if created {
        state
            .publish(
                &user_id,
                Notification::new(
                    NotificationType::CampaignFileAdded,
                    "File added",
                    format!("{} attached to {}", file_name, campaign.name),
                )
                .with_data(json!({ "campaignId": campaign_id, "resourceId": resource.id })),
            )
            .await;
    }

    // Extraction is fully async; the response returns immediately. Duplicate
    // enqueues for an in-flight resource are dropped by the queue.
    state.queue.enqueue(ExtractionTask {
        username: user_id,
        campaign_id: campaign_id.clone(),
        resource_id: resource.id.clone(),
        resource_name: resource.file_name.clone(),
        file_key: resource.file_key.clone(),
    })?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({ "resource": resource }))).into_response())
}

pub async fn retry_extraction(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path((campaign_id, resource_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    owned_campaign(&state, &user_id, &campaign_id).await?;
    let resource = state
        .resources
        .get(&resource_id)
        .await?
        .ok_or_else(|| ApiError(LoreforgeError::NotFound(format!("resource {resource_id}"))))?;

    let queued = state.queue.enqueue(ExtractionTask {
        username: user_id,
        campaign_id,
        resource_id: resource.id,
        resource_name: resource.file_name,
        file_key: resource.file_key,
    })?;
    Ok(Json(json!({ "queued": queued })))
}

pub async fn extraction_status(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path((campaign_id, resource_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    owned_campaign(&state, &user_id, &campaign_id).await?;
    let resource = state
        .resources
        .get(&resource_id)
        .await?
        .ok_or_else(|| ApiError(LoreforgeError::NotFound(format!("resource {resource_id}"))))?;
    Ok(Json(json!({
        "resourceId": resource.id,
        "status": resource.status,
        "inFlight": state.queue.is_in_flight(&campaign_id, &resource_id),
    })))
}

pub async fn detach(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path((campaign_id, resource_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    owned_campaign(&state, &user_id, &campaign_id).await?;
    state.resources.delete(&resource_id).await?;
    Ok(Json(json!({ "deleted": resource_id })))
}
