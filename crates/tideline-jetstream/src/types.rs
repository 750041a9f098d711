use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized `app.bsky.feed.post` creation, ready to be matched against
/// job keywords and regexes. Only produced once every §3 invariant (non-
/// empty `text`, `rkey`, `cid`, `collection`, `authorDid`) holds; posts
/// failing one are dropped at normalization, never propagated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostEvent {
    /// `at://{authorDid}/{collection}/{rkey}` locator for the record.
    pub uri: String,
    /// Content ID of the record revision.
    pub cid: String,
    /// DID of the authoring account. Handle resolution happens downstream
    /// in the DID resolver, not here.
    pub author_did: String,
    /// Post body text. Never empty (empty-text posts are dropped).
    pub text: String,
    /// `createdAt` claimed by the record itself. Not trustworthy as an
    /// ordering key; use `time_us` for that.
    pub created_at: Option<DateTime<Utc>>,
    /// Jetstream's `time_us`, used as the replay cursor.
    pub time_us: i64,
    /// BCP-47 language tags the author attached to the post, if any.
    pub languages: Vec<String>,
    /// Whether this post is a reply to another post.
    pub is_reply: bool,
}

/// Connection lifecycle state of the Jetstream client, as observed through
/// [`crate::JetstreamClient::status_stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

/// Point-in-time counters exposed through [`crate::JetstreamClient::metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JetstreamMetrics {
    pub messages_total: u64,
    pub posts_total: u64,
    pub messages_per_sec: f64,
    pub reconnect_count: u32,
    pub last_event_time_us: Option<i64>,
}

impl Default for JetstreamMetrics {
    fn default() -> Self {
        Self {
            messages_total: 0,
            posts_total: 0,
            messages_per_sec: 0.0,
            reconnect_count: 0,
            last_event_time_us: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireEvent {
    pub did: String,
    pub time_us: i64,
    pub kind: String,
    pub commit: Option<WireCommit>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireCommit {
    #[allow(dead_code)]
    pub rev: String,
    pub operation: String,
    pub collection: String,
    pub rkey: String,
    pub record: Option<WireRecord>,
    pub cid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireRecord {
    pub text: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "langs")]
    pub langs: Vec<String>,
    #[serde(default)]
    pub reply: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_commit_event_with_a_post_record() {
        let json = r#"{
            "did": "did:plc:test123",
            "time_us": 1706000000000000,
            "kind": "commit",
            "commit": {
                "rev": "3abc123",
                "operation": "create",
                "collection": "app.bsky.feed.post",
                "rkey": "3xyz789",
                "record": {"text": "hello world", "createdAt": "2024-01-23T10:00:00Z", "langs": ["en"]},
                "cid": "bafytest"
            }
        }"#;

        let event: WireEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.did, "did:plc:test123");
        let commit = event.commit.unwrap();
        assert_eq!(commit.collection, "app.bsky.feed.post");
        let record = commit.record.unwrap();
        assert_eq!(record.text.unwrap(), "hello world");
        assert_eq!(record.langs, vec!["en".to_string()]);
    }

    #[test]
    fn parses_a_delete_event_without_a_record() {
        let json = r#"{
            "did": "did:plc:test123",
            "time_us": 1706000000000000,
            "kind": "commit",
            "commit": {
                "rev": "3abc123",
                "operation": "delete",
                "collection": "app.bsky.feed.post",
                "rkey": "3xyz789"
            }
        }"#;

        let event: WireEvent = serde_json::from_str(json).unwrap();
        let commit = event.commit.unwrap();
        assert_eq!(commit.operation, "delete");
        assert!(commit.record.is_none());
    }

    #[test]
    fn parses_a_reply_marker() {
        let json = r#"{
            "did": "did:plc:test123",
            "time_us": 1,
            "kind": "commit",
            "commit": {
                "rev": "a",
                "operation": "create",
                "collection": "app.bsky.feed.post",
                "rkey": "r",
                "record": {"text": "hi", "reply": {"parent": {"uri": "at://x"}}}
            }
        }"#;
        let event: WireEvent = serde_json::from_str(json).unwrap();
        assert!(event.commit.unwrap().record.unwrap().reply.is_some());
    }
}
