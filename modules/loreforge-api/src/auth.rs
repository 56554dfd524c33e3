use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use loreforge_common::LoreforgeError;

use crate::AppState;
use crate::error::ApiError;

const API_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;
/// Stream tokens ride in a query string, so they expire fast.
const STREAM_TOKEN_TTL_SECS: i64 = 5 * 60;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    /// "api" for bearer tokens, "stream" for SSE tokens.
    pub purpose: String,
}

pub fn mint_api_token(secret: &str, user_id: &str) -> Result<String, LoreforgeError> {
    mint(secret, user_id, "api", API_TOKEN_TTL_SECS)
}

pub fn mint_stream_token(secret: &str, user_id: &str) -> Result<String, LoreforgeError> {
    mint(secret, user_id, "stream", STREAM_TOKEN_TTL_SECS)
}

fn mint(secret: &str, user_id: &str, purpose: &str, ttl_secs: i64) -> Result<String, LoreforgeError> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: Utc::now().timestamp() + ttl_secs,
        purpose: purpose.to_string(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| LoreforgeError::Fatal(format!("token minting failed: {e}")))
}

/// Verify a token and require the given purpose. Expired or mispurposed
/// tokens are unauthorized.
pub fn verify_token(secret: &str, token: &str, purpose: &str) -> Result<String, LoreforgeError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| LoreforgeError::Unauthorized(format!("invalid token: {e}")))?;

    if data.claims.purpose != purpose {
        return Err(LoreforgeError::Unauthorized(format!(
            "token purpose {} cannot be used here",
            data.claims.purpose
        )));
    }
    Ok(data.claims.sub)
}

/// Extractor for the authenticated user behind `Authorization: Bearer`.
pub struct AuthUser(pub String);

impl FromRequestParts<std::sync::Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &std::sync::Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ApiError(LoreforgeError::Unauthorized("missing bearer token".to_string()))
            })?;
        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            ApiError(LoreforgeError::Unauthorized("malformed authorization header".to_string()))
        })?;
        let user_id = verify_token(&state.config.jwt_secret, token, "api")?;
        Ok(AuthUser(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_api_token_verifies_for_api_purpose() {
        let token = mint_api_token("secret", "u1").unwrap();
        assert_eq!(verify_token("secret", &token, "api").unwrap(), "u1");
    }

    #[test]
    fn stream_token_is_rejected_as_bearer() {
        let token = mint_stream_token("secret", "u1").unwrap();
        assert!(matches!(
            verify_token("secret", &token, "api"),
            Err(LoreforgeError::Unauthorized(_))
        ));
        assert_eq!(verify_token("secret", &token, "stream").unwrap(), "u1");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = mint_api_token("secret", "u1").unwrap();
        assert!(verify_token("other", &token, "api").is_err());
    }
}
