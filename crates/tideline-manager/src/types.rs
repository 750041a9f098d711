use chrono::{DateTime, Utc};
use tideline_jetstream::{ConnectionStatus, JetstreamMetrics};
use tideline_resolver::ResolverMetrics;

/// Everything the manager needs to register a new job.
#[derive(Debug, Clone)]
pub struct RegisterJobRequest {
    pub job_id: String,
    pub prompt: String,
    pub correlation_id: String,
    /// Wall-clock moment this job auto-completes. Callers typically
    /// derive this from `JETSTREAM_MAX_DURATION_MS` relative to now.
    pub deadline: DateTime<Utc>,
}

/// Composed status across the client, registry, and router, per spec
/// §4.5 `getStatus`/`getStats`.
#[derive(Debug, Clone)]
pub struct ManagerStatus {
    pub connection: ConnectionStatus,
    pub is_listening: bool,
    pub active_job_count: usize,
    pub max_reconnect_exhausted: bool,
    pub jetstream: JetstreamMetrics,
    pub resolver: ResolverMetrics,
}
