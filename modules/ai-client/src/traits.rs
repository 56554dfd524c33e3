use async_trait::async_trait;

use crate::error::AiError;
use crate::search::SearchRequest;

/// One text-in / text-out completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Completion {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.0,
            max_tokens: 4096,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// The LLM seam. Production is `Claude`; tests substitute canned responders.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: Completion) -> Result<String, AiError>;
}

/// The AI-search seam. Production is `AutoRagClient`.
#[async_trait]
pub trait AiSearch: Send + Sync {
    /// Run one search against a scoped document folder, returning the raw
    /// response text (expected, but not guaranteed, to be JSON).
    async fn search(&self, request: SearchRequest) -> Result<String, AiError>;
}
