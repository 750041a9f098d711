//! WebSocket client for the Bluesky Jetstream firehose, scoped to
//! `app.bsky.feed.post` creations and normalized into [`PostEvent`]s.

mod client;
mod error;
mod types;
mod uri;

pub use client::{JetstreamClient, JetstreamConfig, DEFAULT_JETSTREAM_URL};
pub use error::JetstreamError;
pub use types::{ConnectionStatus, JetstreamMetrics, PostEvent};
pub use uri::{AtUri, AtUriError};
