use async_nats::jetstream::AckKind;

use crate::error::BrokerError;

/// The abstract error taxonomy of spec §7, used to decide the
/// acknowledgment a consumed message receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retryable with backoff (e.g. a downstream HTTP call timed out).
    TransientNetwork,
    /// The broker itself refused to accept the message; requeue.
    TransientInfrastructure,
    /// Malformed input; never retried.
    Validation,
    /// Upstream told us the referenced entity does not exist.
    NotFound,
    /// Upstream asked us to slow down.
    RateLimited,
    /// Reconnect or retry budget spent; switch to degraded mode.
    Exhaustion,
    /// Unreachable-in-practice condition; unwind to shutdown.
    Fatal,
}

/// The three consumption outcomes of spec §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    NackRequeue,
    NackNoRequeue,
}

/// Map a consume-side result to its ack decision, per spec §4.6:
/// - success: ack
/// - validation failure (missing fields, unknown job, malformed payload): nack without requeue
/// - transient infrastructure failure: nack with requeue
/// - anything else: nack without requeue, to avoid poison-message loops
pub fn decide_ack(result: Result<(), ErrorKind>) -> AckDecision {
    match result {
        Ok(()) => AckDecision::Ack,
        Err(ErrorKind::TransientInfrastructure) | Err(ErrorKind::TransientNetwork) => {
            AckDecision::NackRequeue
        }
        Err(_) => AckDecision::NackNoRequeue,
    }
}

impl AckDecision {
    pub(crate) fn into_ack_kind(self) -> AckKind {
        match self {
            AckDecision::Ack => AckKind::Ack,
            AckDecision::NackRequeue => AckKind::Nak(None),
            AckDecision::NackNoRequeue => AckKind::Term,
        }
    }
}

/// Apply an [`AckDecision`] to a consumed JetStream message.
pub async fn apply_ack(
    message: &async_nats::jetstream::Message,
    decision: AckDecision,
) -> Result<(), BrokerError> {
    message
        .ack_with(decision.into_ack_kind())
        .await
        .map_err(|e| BrokerError::Ack(e.to_string()))
}
