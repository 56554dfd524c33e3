use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use loreforge_agents::{ToolCall, ToolInvocation};
use loreforge_common::{ChatMessage, LoreforgeError};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::rest::campaigns::owned_campaign;
use crate::AppState;

#[derive(Deserialize)]
pub struct ChatBody {
    pub message: String,
}

/// `POST /campaigns/:id/chat` — route the message to a specialized agent and
/// persist both sides of the exchange.
pub async fn send(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(campaign_id): Path<String>,
    Json(body): Json<ChatBody>,
) -> Result<Json<Value>, ApiError> {
    owned_campaign(&state, &user_id, &campaign_id).await?;
    if body.message.trim().is_empty() {
        return Err(LoreforgeError::Validation("message is required".to_string()).into());
    }

    state
        .messages
        .append(&ChatMessage {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            campaign_id: campaign_id.clone(),
            role: "user".to_string(),
            content: body.message.clone(),
            agent_type: None,
            created_at: Utc::now(),
        })
        .await?;

    let routed = match &state.agent_router {
        Some(router) => router.route(&body.message).await?,
        None => loreforge_agents::RoutedAgent {
            agent: state.agent_registry.default_agent(),
            confidence: 0.0,
            reason: "no LLM configured".to_string(),
        },
    };
    let descriptor = state.agent_registry.get(routed.agent);

    state
        .messages
        .append(&ChatMessage {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            campaign_id,
            role: "assistant".to_string(),
            content: format!("routed to {}", routed.agent),
            agent_type: Some(routed.agent.to_string()),
            created_at: Utc::now(),
        })
        .await?;

    Ok(Json(json!({
        "agent": routed.agent,
        "confidence": routed.confidence,
        "reason": routed.reason,
        "tools": descriptor.tools,
    })))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(campaign_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    owned_campaign(&state, &user_id, &campaign_id).await?;
    let messages = state.messages.list(&user_id, &campaign_id).await?;
    Ok(Json(json!({ "messages": messages })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeBody {
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    pub tool_call_id: String,
}

/// `POST /tools/invoke` — dispatch a tool call. Mutating tools come back as
/// a pending state and only execute on the confirmation event.
pub async fn invoke_tool(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<InvokeBody>,
) -> Result<Json<Value>, ApiError> {
    let runtime = state.tool_runtime_for(&user_id).await;
    let invocation = runtime
        .invoke(ToolCall {
            tool_name: body.tool_name,
            args: body.args,
            tool_call_id: body.tool_call_id,
        })
        .await;

    Ok(Json(match invocation {
        ToolInvocation::Executed(result) => json!({ "result": result }),
        ToolInvocation::PendingConfirmation { tool_call_id } => {
            json!({ "pendingConfirmation": true, "toolCallId": tool_call_id })
        }
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBody {
    pub tool_call_id: String,
    pub approved: bool,
}

/// `POST /tools/confirm` — resolve a held mutating call.
pub async fn confirm_tool(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<ConfirmBody>,
) -> Result<Json<Value>, ApiError> {
    let runtime = state.tool_runtime_for(&user_id).await;
    let result = runtime.confirm(&body.tool_call_id, body.approved).await;
    Ok(Json(json!({ "result": result })))
}
