use thiserror::Error;

/// Errors surfaced by the Jetstream client.
#[derive(Debug, Error)]
pub enum JetstreamError {
    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("failed to parse jetstream message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),

    #[error("cursor store error: {0}")]
    Cursor(#[from] tideline_cursor::CursorError),

    #[error("client already running")]
    AlreadyRunning,
}
