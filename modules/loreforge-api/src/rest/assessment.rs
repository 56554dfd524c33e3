use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use loreforge_common::FileStatus;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::AppState;

/// `GET /assessment/user-state` — where this user is in the authoring flow.
pub async fn user_state(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let campaigns = state.campaigns.list_by_owner(&user_id).await?;
    let files = state.files.list_by_owner(&user_id).await?;
    let ready_files = files
        .iter()
        .filter(|f| f.status == FileStatus::Completed)
        .count();

    Ok(Json(json!({
        "userState": {
            "campaigns": campaigns.len(),
            "files": files.len(),
            "readyFiles": ready_files,
        }
    })))
}

/// `GET /assessment/recommendations` — next steps derived from user state.
pub async fn recommendations(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let campaigns = state.campaigns.list_by_owner(&user_id).await?;
    let files = state.files.list_by_owner(&user_id).await?;

    let mut recommendations: Vec<&str> = Vec::new();
    if campaigns.is_empty() {
        recommendations.push("Create your first campaign");
    }
    if files.is_empty() {
        recommendations.push("Upload source material to extract structured content");
    }
    if !campaigns.is_empty() && files.iter().any(|f| f.status == FileStatus::Completed) {
        let mut any_resources = false;
        for campaign in &campaigns {
            if !state.resources.list_by_campaign(&campaign.id).await?.is_empty() {
                any_resources = true;
                break;
            }
        }
        if !any_resources {
            recommendations.push("Attach an indexed file to a campaign to build its world graph");
        }
    }

    Ok(Json(json!({ "recommendations": recommendations })))
}

/// `GET /assessment/activity` — recent rebuild activity across campaigns.
pub async fn activity(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let campaigns = state.campaigns.list_by_owner(&user_id).await?;
    let mut rebuilds = Vec::new();
    for campaign in &campaigns {
        if let Some(status) = state.rebuilds.latest_for_campaign(&campaign.id).await? {
            rebuilds.push(json!({
                "campaignId": campaign.id,
                "campaignName": campaign.name,
                "status": status.status,
                "rebuildType": status.rebuild_type,
                "completedAt": status.completed_at,
            }));
        }
    }

    Ok(Json(json!({ "activity": { "rebuilds": rebuilds } })))
}
