use thiserror::Error;

/// Errors surfaced by the broker client. Publish failures are always
/// logged at the emit site (spec §4.6) in addition to being returned, so
/// callers that treat emission as fire-and-forget can safely ignore the
/// `Result`.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to serialize broker payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to publish to nats: {0}")]
    Publish(#[from] async_nats::PublishError),

    #[error("failed to publish to jetstream: {0}")]
    JetstreamPublish(#[from] async_nats::jetstream::context::PublishError),

    #[error("failed to connect to nats: {0}")]
    Connect(#[from] async_nats::ConnectError),

    #[error("failed to ack/nack message: {0}")]
    Ack(String),
}
