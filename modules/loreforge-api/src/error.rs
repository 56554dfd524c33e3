use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use loreforge_common::LoreforgeError;

/// Response-side wrapper for the shared error taxonomy. One mapping, used by
/// every handler via `?`.
pub struct ApiError(pub LoreforgeError);

impl From<LoreforgeError> for ApiError {
    fn from(e: LoreforgeError) -> Self {
        Self(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(LoreforgeError::Anyhow(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, retry_after) = match &self.0 {
            LoreforgeError::Validation(_) => (StatusCode::BAD_REQUEST, None),
            LoreforgeError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, None),
            LoreforgeError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            LoreforgeError::Conflict(_) => (StatusCode::CONFLICT, None),
            LoreforgeError::Precondition(_) => (StatusCode::BAD_REQUEST, None),
            LoreforgeError::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, None),
            LoreforgeError::RateLimited {
                retry_after_secs, ..
            } => (StatusCode::TOO_MANY_REQUESTS, *retry_after_secs),
            LoreforgeError::ResourceExhausted(_) => (StatusCode::PAYLOAD_TOO_LARGE, None),
            LoreforgeError::Fatal(_) | LoreforgeError::Anyhow(_) => {
                tracing::error!(error = %self.0, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let body = json!({
            "error": self.0.to_string(),
            "code": self.0.tag(),
        });
        let mut response = (status, axum::Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_statuses() {
        let cases = [
            (LoreforgeError::Validation("x".into()), 400),
            (LoreforgeError::Unauthorized("x".into()), 401),
            (LoreforgeError::NotFound("x".into()), 404),
            (LoreforgeError::Conflict("x".into()), 409),
            (LoreforgeError::Precondition("x".into()), 400),
            (LoreforgeError::Transient("x".into()), 503),
            (LoreforgeError::rate_limited("x", Some(30)), 429),
            (LoreforgeError::ResourceExhausted("x".into()), 413),
            (LoreforgeError::Fatal("x".into()), 500),
        ];
        for (error, expected) in cases {
            let response = ApiError(error).into_response();
            assert_eq!(response.status().as_u16(), expected);
        }
    }

    #[test]
    fn rate_limit_sets_retry_after_header() {
        let response = ApiError(LoreforgeError::rate_limited("slow down", Some(30))).into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "30");
    }
}
