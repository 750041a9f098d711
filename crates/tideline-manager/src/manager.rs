use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tideline_broker::{
    EventSink, FailedPayload, IngestionCompletePayload, InitialBatchCompletePayload, Pattern,
    PostEventPayload,
};
use tideline_jetstream::{ConnectionStatus, JetstreamClient};
use tideline_jobs::{JobConfig, JobOutcome, JobRegistry};
use tideline_resolver::DidResolver;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ManagerError;
use crate::types::{ManagerStatus, RegisterJobRequest};

/// Grace window between the last job leaving the registry and the firehose
/// connection actually being torn down, to absorb rapid register/cancel
/// churn (spec §4.5: "no firehose connection without at least one
/// potential consumer over the grace window").
const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(10);

/// Owns the firehose client and the job registry as a coupled pair: starts
/// the connection on the first job, tears it down (after a grace window)
/// once the last job leaves, and fails every active job if the connection
/// exhausts its reconnect budget.
pub struct JetstreamManager {
    client: Arc<JetstreamClient>,
    registry: Arc<JobRegistry>,
    resolver: Arc<DidResolver>,
    sink: Arc<dyn EventSink>,
    grace_window: Duration,
    /// Per-connection-cycle shutdown signal. Recreated each time the
    /// connection starts so a stop/start pair never reuses a receiver
    /// that's already seen `true`.
    run_shutdown: std::sync::Mutex<Option<watch::Sender<bool>>>,
    run_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    grace_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    is_listening: AtomicBool,
    active_job_count: AtomicUsize,
}

impl JetstreamManager {
    pub fn new(
        client: Arc<JetstreamClient>,
        registry: Arc<JobRegistry>,
        resolver: Arc<DidResolver>,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        Self::with_grace_window(client, registry, resolver, sink, DEFAULT_GRACE_WINDOW)
    }

    pub fn with_grace_window(
        client: Arc<JetstreamClient>,
        registry: Arc<JobRegistry>,
        resolver: Arc<DidResolver>,
        sink: Arc<dyn EventSink>,
        grace_window: Duration,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            client,
            registry,
            resolver,
            sink,
            grace_window,
            run_shutdown: std::sync::Mutex::new(None),
            run_handle: std::sync::Mutex::new(None),
            grace_handle: std::sync::Mutex::new(None),
            is_listening: AtomicBool::new(false),
            active_job_count: AtomicUsize::new(0),
        });
        manager.spawn_router();
        manager.spawn_exhaustion_observer();
        manager
    }

    /// Register a new job, guaranteeing the firehose is active before
    /// returning success (spec §4.5 `registerJob`).
    pub async fn register_job(
        self: &Arc<Self>,
        request: RegisterJobRequest,
    ) -> Result<(), ManagerError> {
        self.ensure_listening();

        let job_id = request.job_id.clone();
        let manager = Arc::clone(self);
        let manager_for_complete = Arc::clone(self);
        let job_id_for_complete = job_id.clone();

        let config = JobConfig {
            job_id: request.job_id,
            prompt: request.prompt,
            correlation_id: request.correlation_id,
            deadline: request.deadline,
            on_data: Arc::new(move |event| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    manager.emit_raw_data(event).await;
                });
                Ok(())
            }),
            on_complete: Arc::new(move |outcome| {
                let manager = Arc::clone(&manager_for_complete);
                let job_id = job_id_for_complete.clone();
                tokio::spawn(async move {
                    manager.handle_job_outcome(&job_id, outcome).await;
                    manager.job_left();
                });
            }),
        };

        match self.registry.register(config) {
            Ok(()) => {
                let sink = Arc::clone(&self.sink);
                let payload = InitialBatchCompletePayload::new(&job_id, Utc::now());
                emit(sink, Pattern::JobInitialBatchComplete, payload).await;
                Ok(())
            }
            Err(e) => {
                self.job_left();
                let payload = FailedPayload::new(&job_id, e.to_string(), Utc::now());
                emit(Arc::clone(&self.sink), Pattern::JobFailed, payload).await;
                Err(e.into())
            }
        }
    }

    /// Terminal completion (spec §4.4/§4.5 `completeJob`). Idempotent: a
    /// job already removed is a silent no-op.
    pub fn complete_job(&self, job_id: &str) {
        self.registry.complete(job_id);
    }

    /// Terminal cancellation (spec §4.4/§4.5 `cancelJob`). Idempotent.
    pub fn cancel_job(&self, job_id: &str) {
        self.registry.cancel(job_id);
    }

    pub fn is_job_registered(&self, job_id: &str) -> bool {
        self.registry.is_registered(job_id)
    }

    pub fn is_currently_listening(&self) -> bool {
        self.is_listening.load(Ordering::Acquire)
    }

    /// Composed status across the client, registry, and router.
    pub fn get_status(&self) -> ManagerStatus {
        ManagerStatus {
            connection: self.client.connection_status(),
            is_listening: self.is_currently_listening(),
            active_job_count: self.registry.len(),
            max_reconnect_exhausted: self.client.is_max_reconnect_exhausted(),
            jetstream: self.client.metrics(),
            resolver: self.resolver.metrics(),
        }
    }

    /// Alias for `get_status`, matching the spec's `getStats` naming.
    pub fn get_stats(&self) -> ManagerStatus {
        self.get_status()
    }

    /// Force a reconnect attempt — useful after `isMaxReconnectExhausted()`
    /// becomes true and an operator wants to retry.
    pub fn reconnect(self: &Arc<Self>) {
        self.client.reset_reconnect_state();
        self.stop_connection();
        self.start_connection();
    }

    fn ensure_listening(self: &Arc<Self>) {
        // Cancel a pending grace-window teardown if one is in flight.
        if let Some(handle) = self.grace_handle.lock().unwrap().take() {
            handle.abort();
        }

        let previous = self.active_job_count.fetch_add(1, Ordering::AcqRel);
        if previous == 0 {
            self.start_connection();
        }
    }

    fn job_left(self: &Arc<Self>) {
        let remaining = self.active_job_count.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining != 0 {
            return;
        }

        let manager = Arc::clone(self);
        let grace = self.grace_window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if manager.active_job_count.load(Ordering::Acquire) == 0 {
                manager.stop_connection();
            }
        });
        *self.grace_handle.lock().unwrap() = Some(handle);
    }

    fn start_connection(self: &Arc<Self>) {
        if self.is_listening.swap(true, Ordering::AcqRel) {
            return;
        }

        let (tx, rx) = watch::channel(false);
        *self.run_shutdown.lock().unwrap() = Some(tx);

        let client = Arc::clone(&self.client);
        let handle = tokio::spawn(async move {
            if let Err(e) = client.run(rx).await {
                warn!(error = %e, "jetstream run loop exited with an error");
            }
        });
        *self.run_handle.lock().unwrap() = Some(handle);
        info!("jetstream connection started");
    }

    fn stop_connection(&self) {
        if !self.is_listening.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(tx) = self.run_shutdown.lock().unwrap().take() {
            let _ = tx.send(true);
        }
        info!("jetstream connection stopped after grace window");
    }

    /// Drains the client's broadcast stream for the lifetime of the
    /// manager and hands every post to the registry. Independent of
    /// connect/disconnect cycles: a slow start/stop churn never leaves
    /// posts unrouted once the connection comes back up.
    fn spawn_router(self: &Arc<Self>) {
        let client = Arc::clone(&self.client);
        let registry = Arc::clone(&self.registry);
        let mut posts = client.posts_stream();
        tokio::spawn(async move {
            loop {
                match posts.recv().await {
                    Ok(post) => registry.route_post(&post),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "router lagged behind the firehose broadcast");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("firehose broadcast closed; router exiting");
                        return;
                    }
                }
            }
        });
    }

    /// Watches connection status; once reconnect attempts are exhausted,
    /// fails every active job (spec §4.5/§7: "reconnect exhaustion
    /// surfaces to the manager, which fails affected jobs with
    /// Exhaustion").
    fn spawn_exhaustion_observer(self: &Arc<Self>) {
        let client = Arc::clone(&self.client);
        let registry = Arc::clone(&self.registry);
        let mut status = client.status_stream();
        tokio::spawn(async move {
            loop {
                if status.changed().await.is_err() {
                    return;
                }
                if *status.borrow() == ConnectionStatus::Error && client.is_max_reconnect_exhausted()
                {
                    warn!("reconnect attempts exhausted; failing all active jobs");
                    for snapshot in registry.snapshots() {
                        registry.fail(
                            &snapshot.job_id,
                            "firehose reconnect attempts exhausted".to_string(),
                        );
                    }
                }
            }
        });
    }

    async fn emit_raw_data(&self, event: tideline_jobs::JobMatchEvent) {
        let author_name = self.resolver.resolve_handle_or_null(&event.post.author_did).await;
        let payload = PostEventPayload::bluesky(
            &event.job_id,
            event.post.text.clone(),
            event.post.uri.clone(),
            author_name,
            event.post.created_at.unwrap_or_else(Utc::now),
            Utc::now(),
        );
        emit(Arc::clone(&self.sink), Pattern::JobRawData, payload).await;
    }

    async fn handle_job_outcome(&self, job_id: &str, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Completed { matched_count } | JobOutcome::Cancelled { matched_count } => {
                let payload = IngestionCompletePayload {
                    job_id: job_id.to_string(),
                    total_items: matched_count,
                    completed_at: Utc::now(),
                };
                emit(
                    Arc::clone(&self.sink),
                    Pattern::JobIngestionComplete,
                    payload.clone(),
                )
                .await;
                // `job.complete` has no distinct schema in spec §6; it
                // carries the same terminal counters to the gateway queue
                // that `job.ingestion_complete` carries to analysis.
                emit(Arc::clone(&self.sink), Pattern::JobComplete, payload).await;
            }
            JobOutcome::Failed { error, .. } => {
                let payload = FailedPayload::new(job_id, error, Utc::now());
                emit(Arc::clone(&self.sink), Pattern::JobFailed, payload).await;
            }
        }
    }
}

async fn emit(sink: Arc<dyn EventSink>, pattern: Pattern, payload: impl serde::Serialize) {
    let value = match serde_json::to_value(&payload) {
        Ok(value) => value,
        Err(e) => {
            warn!(pattern = pattern.name(), error = %e, "failed to serialize outbound payload");
            return;
        }
    };
    if let Err(e) = sink.emit(pattern, value).await {
        warn!(pattern = pattern.name(), error = %e, "failed to emit broker envelope");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;
    use tideline_broker::BrokerError;
    use tideline_cursor::MemoryCursorStore;
    use tideline_jetstream::JetstreamConfig;
    use tideline_resolver::ResolverConfig;

    #[derive(Default)]
    struct RecordingSink {
        emitted: StdMutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn emit(&self, pattern: Pattern, payload: Value) -> Result<(), BrokerError> {
            self.emitted
                .lock()
                .unwrap()
                .push((pattern.name().to_string(), payload));
            Ok(())
        }
    }

    fn manager(sink: Arc<RecordingSink>) -> Arc<JetstreamManager> {
        // Point at an address nothing listens on so the background run
        // loop fails fast instead of reaching out to the real firehose.
        let config = JetstreamConfig {
            url: "ws://127.0.0.1:1/subscribe".to_string(),
            max_reconnect_attempts: Some(0),
            ..JetstreamConfig::default()
        };
        let client = Arc::new(JetstreamClient::new(config, Arc::new(MemoryCursorStore::new())));
        JetstreamManager::with_grace_window(
            client,
            JobRegistry::new(),
            Arc::new(DidResolver::new(ResolverConfig::default())),
            sink,
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn registering_a_job_starts_listening_and_emits_initial_batch_complete() {
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(Arc::clone(&sink));

        let request = RegisterJobRequest {
            job_id: "j1".to_string(),
            prompt: "Tesla stock".to_string(),
            correlation_id: "j1".to_string(),
            deadline: Utc::now() + ChronoDuration::seconds(30),
        };
        manager.register_job(request).await.unwrap();

        assert!(manager.is_currently_listening());
        assert!(manager.is_job_registered("j1"));

        let emitted = sink.emitted.lock().unwrap();
        assert!(emitted
            .iter()
            .any(|(pattern, _)| pattern == "job.initial_batch_complete"));
    }

    #[tokio::test]
    async fn a_duplicate_job_id_fails_and_emits_job_failed() {
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(Arc::clone(&sink));

        let request = |id: &str| RegisterJobRequest {
            job_id: id.to_string(),
            prompt: "Tesla stock".to_string(),
            correlation_id: id.to_string(),
            deadline: Utc::now() + ChronoDuration::seconds(30),
        };

        manager.register_job(request("dup")).await.unwrap();
        let err = manager.register_job(request("dup")).await.unwrap_err();
        assert!(matches!(err, ManagerError::Registry(_)));

        let emitted = sink.emitted.lock().unwrap();
        assert!(emitted.iter().any(|(pattern, _)| pattern == "job.failed"));
    }

    #[tokio::test]
    async fn completing_the_last_job_stops_listening_after_the_grace_window() {
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(Arc::clone(&sink));

        let request = RegisterJobRequest {
            job_id: "j1".to_string(),
            prompt: "Tesla stock".to_string(),
            correlation_id: "j1".to_string(),
            deadline: Utc::now() + ChronoDuration::seconds(30),
        };
        manager.register_job(request).await.unwrap();
        manager.complete_job("j1");

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(manager.is_currently_listening());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!manager.is_currently_listening());
    }

    #[tokio::test]
    async fn registering_a_second_job_during_the_grace_window_keeps_listening() {
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(Arc::clone(&sink));

        let request = |id: &str| RegisterJobRequest {
            job_id: id.to_string(),
            prompt: "Tesla stock".to_string(),
            correlation_id: id.to_string(),
            deadline: Utc::now() + ChronoDuration::seconds(30),
        };

        manager.register_job(request("j1")).await.unwrap();
        manager.complete_job("j1");
        manager.register_job(request("j2")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(manager.is_currently_listening());
    }
}
