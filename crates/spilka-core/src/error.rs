use thiserror::Error;

/// Request-scoped failure taxonomy. Every error maps to exactly one outcome
/// for the caller; nothing here is fatal to the process.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// Caller is not authenticated.
    #[error("unauthorized")]
    Unauthorized,

    /// The resource does not exist, or the caller has no visibility into it.
    /// Non-participants probing a conversation get this, not Forbidden, so
    /// existence is not leaked.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Authenticated, resource exists, but the action is denied.
    #[error("{0}")]
    Forbidden(&'static str),

    /// Malformed input.
    #[error("{0}")]
    Validation(String),

    /// Sender exceeded the rolling per-minute message cap.
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Concurrent-modification race detected.
    #[error("{0}")]
    Conflict(&'static str),

    /// Infrastructure failure; details are logged, not surfaced.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MessagingError>;
