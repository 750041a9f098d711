use thiserror::Error;

/// Errors produced by cursor persistence backends.
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cursor backend not implemented: {0}")]
    BackendNotImplemented(&'static str),

    #[error("io error reading or writing cursor file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize cursor record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("cursor store is shutting down")]
    Closed,
}
