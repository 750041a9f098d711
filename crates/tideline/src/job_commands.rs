//! Minimal NATS-driven control surface: `job.start` registers a job with
//! the manager, `job.cancel` cancels one. This is the smallest integration
//! needed to exercise the manager without inventing an in-scope HTTP API
//! (spec.md's HTTP/SSE front door is explicitly external scope).

use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::stream::Config as StreamConfig;
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tideline_broker::{apply_ack, decide_ack, ErrorKind, Pattern};
use tideline_manager::{JetstreamManager, RegisterJobRequest};
use tracing::{info, warn};

const STREAM_NAME: &str = "TIDELINE_INGESTION";
const CONSUMER_NAME: &str = "tideline-orchestrator";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    pattern: String,
    payload: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStartPayload {
    job_id: String,
    prompt: String,
    correlation_id: String,
    max_duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobCancelPayload {
    job_id: String,
}

/// Subscribes to the `ingestion` queue (spec §4.6: `job.start`/`job.cancel`
/// both route there) and drives the manager accordingly, applying the
/// ack/nack policy of §4.6 to every consumed message.
pub async fn run(
    jetstream: async_nats::jetstream::Context,
    manager: Arc<JetstreamManager>,
    default_deadline_ms: u64,
) -> Result<(), async_nats::Error> {
    let stream = jetstream
        .get_or_create_stream(StreamConfig {
            name: STREAM_NAME.to_string(),
            subjects: vec![Pattern::JobStart.queue().as_subject().to_string()],
            ..Default::default()
        })
        .await?;

    let consumer = stream
        .get_or_create_consumer(
            CONSUMER_NAME,
            PullConfig {
                durable_name: Some(CONSUMER_NAME.to_string()),
                ..Default::default()
            },
        )
        .await?;

    let mut messages = consumer.messages().await?;
    while let Some(message) = messages.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "failed to pull message from ingestion consumer");
                continue;
            }
        };

        let result = handle_one(&manager, &message.payload, default_deadline_ms).await;
        let decision = decide_ack(result);
        if let Err(e) = apply_ack(&message, decision).await {
            warn!(error = %e, "failed to ack/nack ingestion message");
        }
    }

    Ok(())
}

async fn handle_one(
    manager: &Arc<JetstreamManager>,
    bytes: &[u8],
    default_deadline_ms: u64,
) -> Result<(), ErrorKind> {
    let discriminator: Envelope<serde_json::Value> =
        serde_json::from_slice(bytes).map_err(|_| ErrorKind::Validation)?;

    match discriminator.pattern.as_str() {
        "job.start" => {
            let payload: JobStartPayload =
                serde_json::from_value(discriminator.payload).map_err(|_| ErrorKind::Validation)?;
            let deadline = chrono::Utc::now()
                + chrono::Duration::milliseconds(
                    payload.max_duration_ms.unwrap_or(default_deadline_ms) as i64,
                );
            manager
                .register_job(RegisterJobRequest {
                    job_id: payload.job_id.clone(),
                    prompt: payload.prompt,
                    correlation_id: payload.correlation_id,
                    deadline,
                })
                .await
                .map_err(|_| ErrorKind::Validation)?;
            info!(job_id = %payload.job_id, "job started via broker command");
            Ok(())
        }
        "job.cancel" => {
            let payload: JobCancelPayload =
                serde_json::from_value(discriminator.payload).map_err(|_| ErrorKind::Validation)?;
            if !manager.is_job_registered(&payload.job_id) {
                return Err(ErrorKind::NotFound);
            }
            manager.cancel_job(&payload.job_id);
            info!(job_id = %payload.job_id, "job cancelled via broker command");
            Ok(())
        }
        other => {
            warn!(pattern = other, "ignoring unrecognized ingestion pattern");
            Err(ErrorKind::Validation)
        }
    }
}
