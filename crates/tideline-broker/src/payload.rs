use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The per-match payload carried by `job.raw_data`, per spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostEventPayload {
    pub job_id: String,
    pub text_content: String,
    pub source: &'static str,
    pub source_url: String,
    pub author_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upvotes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<i64>,
    pub published_at: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
}

impl PostEventPayload {
    pub fn bluesky(
        job_id: impl Into<String>,
        text_content: impl Into<String>,
        source_url: impl Into<String>,
        author_name: Option<String>,
        published_at: DateTime<Utc>,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            text_content: text_content.into(),
            source: "bluesky",
            source_url: source_url.into(),
            author_name,
            upvotes: None,
            comment_count: None,
            published_at,
            collected_at,
        }
    }
}

/// `job.initial_batch_complete`, emitted immediately after a job registers
/// to signal the transition into the streaming phase. Tideline has no
/// historical backfill, so `initial_batch_count` is always zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialBatchCompletePayload {
    pub job_id: String,
    pub initial_batch_count: u64,
    pub completed_at: DateTime<Utc>,
    pub streaming_active: bool,
}

impl InitialBatchCompletePayload {
    pub fn new(job_id: impl Into<String>, completed_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            initial_batch_count: 0,
            completed_at,
            streaming_active: true,
        }
    }
}

/// `job.ingestion_complete`, emitted on terminal completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionCompletePayload {
    pub job_id: String,
    pub total_items: u64,
    pub completed_at: DateTime<Utc>,
}

/// `job.failed`, emitted on fatal registration or streaming failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedPayload {
    pub job_id: String,
    pub status: &'static str,
    pub error_message: String,
    pub failed_at: DateTime<Utc>,
}

impl FailedPayload {
    pub fn new(job_id: impl Into<String>, error_message: impl Into<String>, failed_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            status: "failed",
            error_message: error_message.into(),
            failed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_event_payload_serializes_with_camel_case_fields() {
        let now = Utc::now();
        let payload = PostEventPayload::bluesky(
            "job-1",
            "hello world",
            "at://did:plc:x/app.bsky.feed.post/r1",
            Some("alice.bsky.social".to_string()),
            now,
            now,
        );
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["textContent"], "hello world");
        assert_eq!(json["source"], "bluesky");
        assert_eq!(json["authorName"], "alice.bsky.social");
        assert!(json.get("upvotes").is_none());
    }

    #[test]
    fn initial_batch_complete_is_always_zero_and_streaming() {
        let payload = InitialBatchCompletePayload::new("job-1", Utc::now());
        assert_eq!(payload.initial_batch_count, 0);
        assert!(payload.streaming_active);
    }
}
