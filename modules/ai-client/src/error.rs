use thiserror::Error;

/// Errors from the LLM and AI-search providers, classified so callers can
/// pick the right backoff schedule without inspecting strings.
#[derive(Error, Debug)]
pub enum AiError {
    #[error("request timed out")]
    Timeout,

    #[error("provider at capacity: {0}")]
    Capacity(String),

    #[error("rate limited{}", retry_after_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("provider error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("network error: {0}")]
    Network(String),
}

fn retry_after_hint(retry_after_secs: &Option<u64>) -> String {
    match retry_after_secs {
        Some(secs) => format!(", retry after {secs}s"),
        None => String::new(),
    }
}

impl AiError {
    /// Classify a reqwest transport error.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AiError::Timeout
        } else {
            AiError::Network(err.to_string())
        }
    }

    /// Classify a non-success HTTP status. `retry_after` comes from the
    /// Retry-After header when the provider sent one.
    pub fn from_status(status: u16, body: String, retry_after: Option<u64>) -> Self {
        match status {
            429 => AiError::RateLimited {
                retry_after_secs: retry_after,
            },
            503 | 529 => AiError::Capacity(body),
            _ if status >= 500 => AiError::Capacity(body),
            _ => AiError::Api { status, body },
        }
    }

    /// Whether the retry schedule for capacity errors applies (vs. timeouts).
    pub fn is_capacity(&self) -> bool {
        matches!(self, AiError::Capacity(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AiError::Timeout)
    }

    /// Retryable at all — rate limits and plain API errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AiError::Timeout | AiError::Capacity(_) | AiError::Network(_)
        )
    }
}
