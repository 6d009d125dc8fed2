use thiserror::Error;

/// Outcome errors delivered to a request's completion callback
#[derive(Error, Debug, Clone)]
pub enum SuggestionError {
    /// Submission rejected because the pending queue is at capacity
    #[error("Suggestion queue is full")]
    QueueFull,

    /// The completion service kept throttling us through every retry
    #[error("Rate limited after retries: {0}")]
    Throttled(String),

    /// Any non-throttling call failure; surfaced once, never retried
    #[error("Completion call failed: {0}")]
    Call(String),

    /// The scheduler stopped before the request was dispatched
    #[error("Scheduler shut down before dispatch")]
    Shutdown,
}

/// Normalized completion-client errors
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        status: Option<u16>,
        retry_after_ms: Option<u64>,
    },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("API error: {message}")]
    Api {
        message: String,
        status: Option<u16>,
    },

    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },
}

impl ClientError {
    /// True only for throttling signals; everything else is terminal
    pub fn is_throttled(&self) -> bool {
        matches!(self, ClientError::RateLimited { .. })
    }
}
