use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::error::BrokerError;
use crate::pattern::Pattern;

/// Capability seam between job-matching code and the broker transport.
/// Lets callers (the jetstream manager) depend on "can emit an envelope"
/// rather than on `async-nats` directly, so tests can substitute an
/// in-memory sink.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, pattern: Pattern, payload: Value) -> Result<(), BrokerError>;
}

/// Publishes outbound envelopes to their statically-routed destination
/// queue (spec §4.6). Emission is at-least-once: publishing goes through
/// the JetStream context and `emit` doesn't return `Ok` until the server
/// has acked the message, so a publish failure is logged here so
/// fire-and-forget callers never need to handle the `Result` themselves,
/// but the error is still returned for callers that want to react to it.
pub struct BrokerClient {
    jetstream: async_nats::jetstream::Context,
}

impl BrokerClient {
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = async_nats::connect(url).await?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: async_nats::Client) -> Self {
        Self::from_jetstream(async_nats::jetstream::new(client))
    }

    pub fn from_jetstream(jetstream: async_nats::jetstream::Context) -> Self {
        Self { jetstream }
    }

    /// Serialize `payload` and publish it to `pattern`'s destination
    /// queue, tagging the envelope with the pattern name so the receiver
    /// can discriminate within a shared subject. Returns only after the
    /// server has acked the publish (spec §4.6: a message must actually
    /// be committed to the transport before emission counts as done).
    pub async fn emit(&self, pattern: Pattern, payload: impl Serialize) -> Result<(), BrokerError> {
        let envelope = serde_json::json!({
            "pattern": pattern.name(),
            "payload": payload,
        });

        let bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(pattern = pattern.name(), error = %e, "failed to serialize broker payload");
                return Err(e.into());
            }
        };

        let subject = pattern.queue().as_subject();
        let ack = self
            .jetstream
            .publish(subject.to_string(), bytes::Bytes::from(bytes))
            .await;

        let ack = match ack {
            Ok(ack) => ack,
            Err(e) => {
                error!(pattern = pattern.name(), queue = subject, error = %e, "failed to publish broker message");
                return Err(e.into());
            }
        };

        if let Err(e) = ack.await {
            error!(pattern = pattern.name(), queue = subject, error = %e, "broker message was not acked by jetstream");
            return Err(e.into());
        }

        Ok(())
    }
}

#[async_trait]
impl EventSink for BrokerClient {
    async fn emit(&self, pattern: Pattern, payload: Value) -> Result<(), BrokerError> {
        BrokerClient::emit(self, pattern, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::FailedPayload;

    #[test]
    fn emit_envelope_carries_the_pattern_name() {
        let payload = FailedPayload::new("job-1", "boom", chrono::Utc::now());
        let envelope = serde_json::json!({
            "pattern": Pattern::JobFailed.name(),
            "payload": payload,
        });
        assert_eq!(envelope["pattern"], "job.failed");
        assert_eq!(envelope["payload"]["jobId"], "job-1");
    }
}
