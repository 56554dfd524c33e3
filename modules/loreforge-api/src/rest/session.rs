use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use loreforge_common::LoreforgeError;

use crate::auth::{mint_api_token, mint_stream_token, AuthUser};
use crate::error::ApiError;
use crate::AppState;

#[derive(Deserialize)]
pub struct AuthenticateRequest {
    username: String,
}

/// `POST /authenticate` — exchange a username for a bearer token. Identity
/// verification upstream of this service is out of scope; this endpoint owns
/// only the token contract.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AuthenticateRequest>,
) -> Result<Json<Value>, ApiError> {
    let username = request.username.trim();
    if username.is_empty() {
        return Err(LoreforgeError::Validation("username is required".to_string()).into());
    }
    let token = mint_api_token(&state.config.jwt_secret, username)?;
    Ok(Json(json!({ "token": token })))
}

/// `POST /notifications/mint-stream` — short-lived token for the SSE stream,
/// minted off the caller's bearer token.
pub async fn mint_stream(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let token = mint_stream_token(&state.config.jwt_secret, &user_id)?;
    Ok(Json(json!({ "token": token })))
}
