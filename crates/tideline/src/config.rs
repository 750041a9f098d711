use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Cursor persistence backend selector (`JETSTREAM_CURSOR_PERSISTENCE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum CursorBackend {
    Memory,
    File,
    RemoteKv,
}

/// Every configuration option from spec §6/§7, loaded from the
/// environment the way `crates/winter/src/main.rs` wires its daemon
/// command: `#[arg(long, env = "...")]` fields with documented defaults.
#[derive(Debug, Parser)]
#[command(name = "tideline", about = "Real-time Jetstream ingestion fabric")]
pub struct Config {
    /// Firehose WebSocket URL.
    #[arg(long, env = "JETSTREAM_ENDPOINT", default_value = tideline_jetstream::DEFAULT_JETSTREAM_URL)]
    pub jetstream_endpoint: String,

    /// Reconnect attempt cap before the manager fails active jobs. Unset
    /// means unlimited.
    #[arg(long, env = "JETSTREAM_RECONNECT_MAX_ATTEMPTS")]
    pub jetstream_reconnect_max_attempts: Option<u32>,

    #[arg(long, env = "JETSTREAM_RECONNECT_INITIAL_BACKOFF_MS", default_value = "1000")]
    pub jetstream_reconnect_initial_backoff_ms: u64,

    #[arg(long, env = "JETSTREAM_RECONNECT_MAX_BACKOFF_MS", default_value = "60000")]
    pub jetstream_reconnect_max_backoff_ms: u64,

    /// Request zstd framing from the firehose server.
    #[arg(long, env = "JETSTREAM_COMPRESS", default_value = "false")]
    pub jetstream_compress: bool,

    /// Default job deadline, used when an inbound `job.start` message
    /// doesn't specify its own duration.
    #[arg(long, env = "JETSTREAM_MAX_DURATION_MS", default_value = "3600000")]
    pub jetstream_max_duration_ms: u64,

    #[arg(long, env = "JETSTREAM_CURSOR_PERSISTENCE", value_enum, default_value_t = CursorBackend::Memory)]
    pub jetstream_cursor_persistence: CursorBackend,

    /// Required when `jetstream_cursor_persistence` is `file`.
    #[arg(long, env = "JETSTREAM_CURSOR_FILE_PATH")]
    pub jetstream_cursor_file_path: Option<String>,

    #[arg(long, env = "JETSTREAM_CURSOR_AUTO_SAVE_MS", default_value = "500")]
    pub jetstream_cursor_auto_save_ms: u64,

    #[arg(long, env = "DID_RESOLVER_MAX_CACHE_SIZE", default_value = "100000")]
    pub did_resolver_max_cache_size: u64,

    #[arg(long, env = "DID_RESOLVER_CACHE_TTL_MS", default_value = "86400000")]
    pub did_resolver_cache_ttl_ms: u64,

    #[arg(long, env = "DID_RESOLVER_BATCH_SIZE", default_value = "25")]
    pub did_resolver_batch_size: usize,

    #[arg(long, env = "DID_RESOLVER_REQUEST_TIMEOUT_MS", default_value = "5000")]
    pub did_resolver_request_timeout_ms: u64,

    #[arg(long, env = "DID_RESOLVER_API_BASE_URL", default_value = "https://public.api.bsky.app")]
    pub did_resolver_api_base_url: String,

    /// NATS server URL for the broker envelope. Not part of spec.md's
    /// configuration table (the spec leaves the transport's own
    /// connection details external), but required ambient wiring.
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,
}

impl Config {
    pub fn jetstream_config(&self) -> tideline_jetstream::JetstreamConfig {
        tideline_jetstream::JetstreamConfig {
            url: self.jetstream_endpoint.clone(),
            compress: self.jetstream_compress,
            max_reconnect_attempts: self.jetstream_reconnect_max_attempts,
            initial_backoff: Duration::from_millis(self.jetstream_reconnect_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.jetstream_reconnect_max_backoff_ms),
        }
    }

    pub fn resolver_config(&self) -> tideline_resolver::ResolverConfig {
        tideline_resolver::ResolverConfig {
            api_base_url: self.did_resolver_api_base_url.clone(),
            max_cache_size: self.did_resolver_max_cache_size,
            cache_ttl: Duration::from_millis(self.did_resolver_cache_ttl_ms),
            batch_size: self.did_resolver_batch_size,
            request_timeout: Duration::from_millis(self.did_resolver_request_timeout_ms),
        }
    }

    pub fn default_job_deadline(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now() + chrono::Duration::milliseconds(self.jetstream_max_duration_ms as i64)
    }
}
