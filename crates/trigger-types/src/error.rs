use thiserror::Error;

/// Errors surfaced at the `TriggerManager` boundary.
///
/// Covers every component of the trigger subsystem with a single flat enum,
/// matching the platform's one-enum-per-domain convention rather than a
/// nested hierarchy.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Register-time config validation failure. Carries the human-readable
    /// reasons collected from the relevant `validate*TriggerConfig` function.
    #[error("invalid trigger config: {0}")]
    InvalidConfig(String),

    /// Webhook authentication failed (missing, malformed, or mismatched
    /// credentials).
    #[error("webhook authentication failed: {0}")]
    AuthFailure(String),

    /// The request was rejected by the rate limiter.
    #[error("rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The request body was recognized as a duplicate delivery within the
    /// configured deduplication window. Soft error: callers map this to a
    /// 200-class response, not a failure.
    #[error("duplicate delivery within deduplication window")]
    Duplicate,

    /// `validatePayload` rejected the request body. Soft error: callers map
    /// this to a 400-class response.
    #[error("payload validation failed: {0}")]
    ValidationFailure(String),

    /// Unknown trigger id, or no enabled trigger matches the given
    /// `(method, path)`.
    #[error("trigger not found: {0}")]
    NotFound(String),

    /// The downstream `onFire` collaborator returned an error.
    #[error("fire failed: {0}")]
    FireFailure(String),

    /// The manager is mid-`stop()`; in-flight waits were aborted.
    #[error("operation cancelled: manager is stopping")]
    Cancelled,

    /// Anything unexpected that doesn't fit another variant.
    #[error("internal error: {0}")]
    InternalError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_display() {
        let err = TriggerError::RateLimited { retry_after_ms: 250 };
        assert_eq!(err.to_string(), "rate limit exceeded, retry after 250ms");
    }

    #[test]
    fn test_invalid_config_display() {
        let err = TriggerError::InvalidConfig("path must start with '/'".to_string());
        assert!(err.to_string().contains("path must start with"));
    }

    #[test]
    fn test_duplicate_display() {
        let err = TriggerError::Duplicate;
        assert_eq!(
            err.to_string(),
            "duplicate delivery within deduplication window"
        );
    }
}
