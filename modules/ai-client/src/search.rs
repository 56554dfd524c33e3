use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::Serialize;
use tracing::debug;

use crate::error::AiError;
use crate::traits::AiSearch;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One AI-search request against a scoped folder of uploaded documents.
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query: String,
    /// Logical folder filter, e.g. `campaigns/<id>/`.
    pub folder: String,
    pub max_results: u32,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, folder: impl Into<String>, max_results: u32) -> Self {
        Self {
            query: query.into(),
            folder: folder.into(),
            max_results,
        }
    }
}

/// Client for the AutoRAG AI-search endpoint: prompt + folder filter in,
/// structured JSON (as text) out.
#[derive(Clone)]
pub struct AutoRagClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AutoRagClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client"),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl AiSearch for AutoRagClient {
    async fn search(&self, request: SearchRequest) -> Result<String, AiError> {
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));

        debug!(folder = %request.folder, max_results = request.max_results, "AI search request");

        let mut builder = self.http.post(&url).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder.send().await.map_err(AiError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::from_status(status.as_u16(), body, retry_after));
        }

        response
            .text()
            .await
            .map_err(|e| AiError::Malformed(e.to_string()))
    }
}
