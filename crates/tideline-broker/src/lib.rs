//! The broker envelope: a closed set of named patterns (spec §6), each
//! routed statically to a destination queue, emitted at-least-once over
//! NATS, with the consume-side ack/nack policy of spec §4.6.

mod ack;
mod client;
mod error;
mod pattern;
mod payload;

pub use ack::{apply_ack, decide_ack, AckDecision, ErrorKind};
pub use client::{BrokerClient, EventSink};
pub use error::BrokerError;
pub use pattern::{Pattern, Queue};
pub use payload::{
    FailedPayload, IngestionCompletePayload, InitialBatchCompletePayload, PostEventPayload,
};
