use thiserror::Error;

/// Errors the DID resolver surfaces per the spec's error taxonomy: transient
/// failures are worth retrying, `NotFound` and `Validation` are not.
#[derive(Debug, Error, Clone)]
pub enum ResolverError {
    #[error("actor not found: {0}")]
    NotFound(String),

    #[error("rate limited resolving {0}")]
    RateLimited(String),

    #[error("transient network error resolving {id}: {source}")]
    TransientNetwork { id: String, source: String },

    #[error("timed out resolving {0}")]
    Timeout(String),

    #[error("id failed validation: {0}")]
    Validation(String),

    #[error("failed to parse profile response for {id}: {source}")]
    Malformed { id: String, source: String },
}
