use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use loreforge_common::{Campaign, LoreforgeError, Notification, NotificationType};
use loreforge_rebuild::reduce_overlay;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::AppState;

#[derive(Deserialize)]
pub struct CampaignBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let campaigns = state.campaigns.list_by_owner(&user_id).await?;
    Ok(Json(json!({ "campaigns": campaigns })))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<CampaignBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(LoreforgeError::Validation("campaign name is required".to_string()).into());
    }
    let campaign = state
        .campaigns
        .create(&user_id, body.name.trim(), &body.description)
        .await?;

    state
        .publish(
            &user_id,
            Notification::new(
                NotificationType::CampaignCreated,
                "Campaign created",
                campaign.name.clone(),
            )
            .with_data(json!({ "campaignId": campaign.id })),
        )
        .await;

    Ok((StatusCode::CREATED, Json(json!({ "campaign": campaign }))))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(campaign_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let campaign = owned_campaign(&state, &user_id, &campaign_id).await?;
    Ok(Json(json!({ "campaign": campaign })))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(campaign_id): Path<String>,
    Json(body): Json<CampaignBody>,
) -> Result<Json<Value>, ApiError> {
    owned_campaign(&state, &user_id, &campaign_id).await?;
    state
        .campaigns
        .update(&campaign_id, body.name.trim(), &body.description)
        .await?;
    let campaign = state.campaigns.get(&campaign_id).await?;
    Ok(Json(json!({ "campaign": campaign })))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(campaign_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let campaign = owned_campaign(&state, &user_id, &campaign_id).await?;
    state.campaigns.delete(&campaign_id).await?;

    state
        .publish(
            &user_id,
            Notification::new(
                NotificationType::CampaignDeleted,
                "Campaign deleted",
                campaign.name,
            )
            .with_data(json!({ "campaignId": campaign_id })),
        )
        .await;

    Ok(Json(json!({ "deleted": campaign_id })))
}

pub async fn delete_all(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let removed = state.campaigns.delete_all_for_owner(&user_id).await?;
    Ok(Json(json!({ "deleted": removed })))
}

pub async fn list_resources(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(campaign_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    owned_campaign(&state, &user_id, &campaign_id).await?;
    let resources = state.resources.list_by_campaign(&campaign_id).await?;
    Ok(Json(json!({ "resources": resources })))
}

/// Current-world overlay: unapplied changelog entries reduced into a
/// snapshot clients layer over stale graph reads.
pub async fn overlay(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(campaign_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    owned_campaign(&state, &user_id, &campaign_id).await?;
    let entries = state.changelog.unapplied(&campaign_id).await?;
    Ok(Json(json!({ "overlay": reduce_overlay(&entries) })))
}

pub async fn rebuild_status(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(campaign_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    owned_campaign(&state, &user_id, &campaign_id).await?;
    let status = state.rebuilds.latest_for_campaign(&campaign_id).await?;
    Ok(Json(json!({ "rebuildStatus": status })))
}

pub(crate) async fn owned_campaign(
    state: &AppState,
    user_id: &str,
    campaign_id: &str,
) -> Result<Campaign, ApiError> {
    state
        .campaigns
        .get_owned(campaign_id, user_id)
        .await?
        .ok_or_else(|| ApiError(LoreforgeError::NotFound(format!("campaign {campaign_id}"))))
}
