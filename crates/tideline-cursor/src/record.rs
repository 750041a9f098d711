use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single durable checkpoint: the microsecond-resolution Jetstream cursor
/// and when it was last advanced.
///
/// Serializes to the persisted-state layout of spec §6:
/// `{cursor: string, savedAt: ISO-8601, metadata?: object}`. The cursor is
/// carried on the wire as a decimal string (per the glossary) even though
/// it's an `i64` internally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorRecord {
    /// Jetstream `time_us` value of the last event the client has fully
    /// processed. Resuming from this value re-delivers everything at or
    /// after it.
    #[serde(rename = "cursor", with = "cursor_as_decimal_string")]
    pub cursor_us: i64,
    /// Wall-clock time this record was written, for observability only.
    #[serde(rename = "savedAt")]
    pub updated_at: DateTime<Utc>,
    /// Backend-specific extra bookkeeping; opaque to every `CursorStore`
    /// implementation but preserved across load/save round-trips.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl CursorRecord {
    pub fn new(cursor_us: i64, updated_at: DateTime<Utc>) -> Self {
        Self {
            cursor_us,
            updated_at,
            metadata: None,
        }
    }

    pub fn with_metadata(cursor_us: i64, updated_at: DateTime<Utc>, metadata: serde_json::Value) -> Self {
        Self {
            cursor_us,
            updated_at,
            metadata: Some(metadata),
        }
    }
}

mod cursor_as_decimal_string {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &i64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}
