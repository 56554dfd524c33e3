use thiserror::Error;

/// The error taxonomy shared across the workspace. Handlers map each variant
/// to exactly one HTTP status; workers use the variant to decide retryability.
#[derive(Error, Debug)]
pub enum LoreforgeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Suggested wait before retrying, in seconds, when the provider told us.
        retry_after_secs: Option<u64>,
    },

    #[error("MEMORY_LIMIT_EXCEEDED: {0}")]
    ResourceExhausted(String),

    #[error("Internal error: {0}")]
    Fatal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl LoreforgeError {
    /// Whether a worker should retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoreforgeError::Transient(_))
    }

    /// Short machine-readable tag used in tool results and diagnostics.
    pub fn tag(&self) -> &'static str {
        match self {
            LoreforgeError::Validation(_) => "validation",
            LoreforgeError::Unauthorized(_) => "unauthorized",
            LoreforgeError::NotFound(_) => "not_found",
            LoreforgeError::Conflict(_) => "conflict",
            LoreforgeError::Precondition(_) => "precondition",
            LoreforgeError::Transient(_) => "transient",
            LoreforgeError::RateLimited { .. } => "rate_limited",
            LoreforgeError::ResourceExhausted(_) => "memory_limit_exceeded",
            LoreforgeError::Fatal(_) => "fatal",
            LoreforgeError::Anyhow(_) => "fatal",
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        LoreforgeError::RateLimited {
            message: message.into(),
            retry_after_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(LoreforgeError::Transient("net".into()).is_retryable());
        assert!(!LoreforgeError::Validation("bad".into()).is_retryable());
        assert!(!LoreforgeError::rate_limited("slow down", Some(30)).is_retryable());
        assert!(!LoreforgeError::ResourceExhausted("too big".into()).is_retryable());
    }

    #[test]
    fn memory_errors_carry_the_contract_tag() {
        let e = LoreforgeError::ResourceExhausted("graph too large".into());
        assert_eq!(e.tag(), "memory_limit_exceeded");
        assert!(e.to_string().contains("MEMORY_LIMIT_EXCEEDED"));
    }
}
