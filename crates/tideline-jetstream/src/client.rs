use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use rand::Rng;
use tideline_cursor::{CursorRecord, CursorStore};
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, trace, warn};

use crate::error::JetstreamError;
use crate::types::{ConnectionStatus, JetstreamMetrics, WireEvent};
use crate::uri::AtUri;
use crate::PostEvent;

/// Default public Jetstream endpoint.
pub const DEFAULT_JETSTREAM_URL: &str = "wss://jetstream2.us-west.bsky.network/subscribe";

/// This pipeline only ever asks Jetstream for post creations.
const WANTED_COLLECTION: &str = "app.bsky.feed.post";

const READ_TIMEOUT: Duration = Duration::from_secs(300);
const METRICS_WINDOW: Duration = Duration::from_secs(60);

/// Configuration for a [`JetstreamClient`].
#[derive(Debug, Clone)]
pub struct JetstreamConfig {
    pub url: String,
    pub compress: bool,
    pub max_reconnect_attempts: Option<u32>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for JetstreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_JETSTREAM_URL.to_string(),
            compress: false,
            max_reconnect_attempts: None,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

struct MetricsState {
    messages_total: u64,
    posts_total: u64,
    reconnect_count: u32,
    last_event_time_us: Option<i64>,
    recent_events: VecDeque<Instant>,
}

impl MetricsState {
    fn new() -> Self {
        Self {
            messages_total: 0,
            posts_total: 0,
            reconnect_count: 0,
            last_event_time_us: None,
            recent_events: VecDeque::new(),
        }
    }

    fn record_message(&mut self, time_us: i64, is_post: bool) {
        self.messages_total += 1;
        if is_post {
            self.posts_total += 1;
        }
        self.last_event_time_us = Some(time_us);

        let now = Instant::now();
        self.recent_events.push_back(now);
        while let Some(front) = self.recent_events.front() {
            if now.duration_since(*front) > METRICS_WINDOW {
                self.recent_events.pop_front();
            } else {
                break;
            }
        }
    }

    fn snapshot(&self) -> JetstreamMetrics {
        JetstreamMetrics {
            messages_total: self.messages_total,
            posts_total: self.posts_total,
            messages_per_sec: self.recent_events.len() as f64 / METRICS_WINDOW.as_secs_f64(),
            reconnect_count: self.reconnect_count,
            last_event_time_us: self.last_event_time_us,
        }
    }
}

/// `delay = min(initial * 2^attempt, max)` plus jitter drawn uniformly from
/// `[0, 25%]` of that base (spec §4.1/§8: reconnect delays lie in
/// `[base*2^n, 1.25*base*2^n]` with `base*2^n <= max`).
fn reconnect_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let base = (initial.as_secs_f64() * 2f64.powi(attempt as i32)).min(max.as_secs_f64());
    let jitter_fraction = rand::rng().random_range(0.0..0.25);
    Duration::from_secs_f64(base * (1.0 + jitter_fraction))
}

/// Jetstream WebSocket client: connects, reconnects with backoff, and fans
/// out normalized post events to every subscriber.
pub struct JetstreamClient {
    config: JetstreamConfig,
    cursor_store: Arc<dyn CursorStore>,
    post_tx: broadcast::Sender<PostEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    metrics: Mutex<MetricsState>,
    last_cursor: Mutex<Option<i64>>,
    max_reconnect_exhausted: AtomicBool,
    running: AtomicBool,
}

/// Guards `run()` against concurrent re-entrance. Releases the flag on
/// every exit path, including the early returns via `?`.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, JetstreamError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| JetstreamError::AlreadyRunning)
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl JetstreamClient {
    pub fn new(config: JetstreamConfig, cursor_store: Arc<dyn CursorStore>) -> Self {
        let (post_tx, _) = broadcast::channel(1024);
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            config,
            cursor_store,
            post_tx,
            status_tx,
            metrics: Mutex::new(MetricsState::new()),
            last_cursor: Mutex::new(None),
            max_reconnect_exhausted: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// Subscribe to normalized post events. Each call yields an independent
    /// receiver; slow subscribers lag rather than blocking the client.
    pub fn posts_stream(&self) -> broadcast::Receiver<PostEvent> {
        self.post_tx.subscribe()
    }

    /// Observe connection lifecycle transitions.
    pub fn status_stream(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    pub fn metrics(&self) -> JetstreamMetrics {
        self.metrics.lock().unwrap().snapshot()
    }

    /// The externally observable cursor: the `time_us` of the latest event
    /// this client has processed, or an externally set override.
    pub fn get_last_cursor(&self) -> Option<i64> {
        *self.last_cursor.lock().unwrap()
    }

    /// Override the cursor the client will resume from on its next
    /// reconnect. Does not itself trigger a reconnect.
    pub fn set_last_cursor(&self, cursor: i64) {
        *self.last_cursor.lock().unwrap() = Some(cursor);
    }

    /// True once `maxReconnectAttempts` consecutive reconnects have failed.
    /// Callers should fall back to a degraded mode and may later call
    /// [`Self::reset_reconnect_state`] to retry.
    pub fn is_max_reconnect_exhausted(&self) -> bool {
        self.max_reconnect_exhausted.load(Ordering::Relaxed)
    }

    /// Reset reconnect/backoff bookkeeping, e.g. after an operator-triggered
    /// manual reconnect, clearing the exhaustion flag so `run` can be
    /// invoked again.
    pub fn reset_reconnect_state(&self) {
        self.metrics.lock().unwrap().reconnect_count = 0;
        self.max_reconnect_exhausted.store(false, Ordering::Relaxed);
    }

    fn build_url(&self, cursor: Option<i64>) -> String {
        let mut url = self.config.url.clone();
        let mut first = !url.contains('?');

        let mut push = |k: &str, v: &str, url: &mut String, first: &mut bool| {
            url.push(if *first { '?' } else { '&' });
            *first = false;
            url.push_str(k);
            url.push('=');
            url.push_str(v);
        };

        push("wantedCollections", WANTED_COLLECTION, &mut url, &mut first);

        if self.config.compress {
            push("compress", "true", &mut url, &mut first);
        }

        if let Some(cursor) = cursor {
            push("cursor", &cursor.to_string(), &mut url, &mut first);
        }

        url
    }

    /// Run the reconnection loop until shutdown is signalled or reconnect
    /// attempts are exhausted. On exhaustion, sets
    /// `is_max_reconnect_exhausted()` and returns; callers (the jetstream
    /// manager) observe this to fail active jobs and may call
    /// `reset_reconnect_state` plus re-invoke `run` to retry.
    ///
    /// Idempotent while already running: a concurrent call returns
    /// `AlreadyRunning` instead of racing the first one's connection.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), JetstreamError> {
        let _guard = RunGuard::acquire(&self.running)?;
        let mut attempts: u32 = 0;

        if self.last_cursor.lock().unwrap().is_none() {
            let loaded = self
                .cursor_store
                .get()
                .await?
                .map(|record| record.cursor_us);
            *self.last_cursor.lock().unwrap() = loaded;
        }

        loop {
            if *shutdown_rx.borrow() {
                self.flush_cursor().await;
                let _ = self.status_tx.send(ConnectionStatus::Disconnected);
                return Ok(());
            }

            let cursor = *self.last_cursor.lock().unwrap();
            let url = self.build_url(cursor);

            let _ = self.status_tx.send(if attempts == 0 {
                ConnectionStatus::Connecting
            } else {
                ConnectionStatus::Reconnecting
            });

            info!(url = %url, attempt = attempts, "connecting to jetstream");

            match self
                .connect_and_process(&url, &mut shutdown_rx)
                .await
            {
                Ok(()) => {
                    self.flush_cursor().await;
                    let _ = self.status_tx.send(ConnectionStatus::Disconnected);
                    return Ok(());
                }
                Err(e) => {
                    error!(error = %e, "jetstream connection error, reconnecting");
                    let _ = self.status_tx.send(ConnectionStatus::Error);

                    attempts += 1;
                    if let Some(max) = self.config.max_reconnect_attempts {
                        if attempts > max {
                            self.max_reconnect_exhausted
                                .store(true, Ordering::Relaxed);
                            warn!(attempts, "reconnect attempts exhausted");
                            return Err(JetstreamError::ReconnectExhausted(attempts - 1));
                        }
                    }

                    self.metrics.lock().unwrap().reconnect_count += 1;

                    let wait = reconnect_delay(
                        self.config.initial_backoff,
                        self.config.max_backoff,
                        attempts - 1,
                    );
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                return Ok(());
                            }
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    async fn flush_cursor(&self) {
        let Some(cursor_us) = self.get_last_cursor() else {
            return;
        };
        if let Err(e) = self
            .cursor_store
            .set_immediate(CursorRecord::new(cursor_us, chrono::Utc::now()))
            .await
        {
            warn!(error = %e, "failed to flush cursor on shutdown");
        }
    }

    async fn connect_and_process(
        &self,
        url: &str,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), JetstreamError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| JetstreamError::WebSocket(format!("connection failed: {e}")))?;

        let (_, mut read) = ws_stream.split();
        let _ = self.status_tx.send(ConnectionStatus::Connected);
        info!("jetstream connected");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("jetstream received shutdown signal");
                        return Ok(());
                    }
                }

                result = tokio::time::timeout(READ_TIMEOUT, read.next()) => {
                    match result {
                        Ok(Some(Ok(Message::Text(text)))) => {
                            if let Err(e) = self.handle_message(&text) {
                                warn!(error = %e, "failed to handle jetstream message");
                            }
                        }
                        Ok(Some(Ok(Message::Ping(_)))) => {
                            trace!("received ping");
                        }
                        Ok(Some(Ok(Message::Close(_)))) => {
                            info!("jetstream connection closed by server");
                            return Err(JetstreamError::WebSocket("connection closed".to_string()));
                        }
                        Ok(Some(Ok(_))) => {}
                        Ok(Some(Err(e))) => {
                            return Err(JetstreamError::WebSocket(format!("read error: {e}")));
                        }
                        Ok(None) => {
                            return Err(JetstreamError::WebSocket("stream ended".to_string()));
                        }
                        Err(_) => {
                            warn!("jetstream read timeout after {}s", READ_TIMEOUT.as_secs());
                            return Err(JetstreamError::WebSocket("read timeout".to_string()));
                        }
                    }
                }
            }
        }
    }

    fn handle_message(&self, text: &str) -> Result<(), JetstreamError> {
        let event: WireEvent = serde_json::from_str(text)?;
        *self.last_cursor.lock().unwrap() = Some(event.time_us);

        let is_post = event.kind == "commit"
            && event
                .commit
                .as_ref()
                .is_some_and(|c| c.collection == WANTED_COLLECTION && c.operation == "create");

        self.metrics
            .lock()
            .unwrap()
            .record_message(event.time_us, is_post);

        if event.kind != "commit" {
            trace!(kind = %event.kind, "ignoring non-commit event");
            return Ok(());
        }

        let Some(commit) = event.commit else {
            return Ok(());
        };

        if commit.operation != "create" || commit.collection != WANTED_COLLECTION {
            return Ok(());
        }

        if event.did.is_empty() || commit.rkey.is_empty() || commit.collection.is_empty() {
            trace!("dropping post with an empty identity component");
            return Ok(());
        }

        let Some(cid) = commit.cid.filter(|c| !c.is_empty()) else {
            trace!("dropping post with no content id");
            return Ok(());
        };

        let Some(record) = commit.record else {
            return Ok(());
        };

        let Some(text) = record.text.filter(|t| !t.is_empty()) else {
            trace!("dropping post with empty text");
            return Ok(());
        };

        let uri = AtUri::build(&event.did, &commit.collection, &commit.rkey).to_string();

        let post = PostEvent {
            uri,
            cid,
            author_did: event.did,
            text,
            created_at: record.created_at,
            time_us: event.time_us,
            languages: record.langs,
            is_reply: record.reply.is_some(),
        };

        // A full channel only means no subscribers are currently registered
        // (the job registry hasn't started yet, or all jobs have drained).
        let _ = self.post_tx.send(post);

        Ok(())
    }

    /// Persist the cursor the client has advanced to. Callers drive this on
    /// their own cadence (e.g. after each batch, or periodically) rather
    /// than on every message, to bound write volume.
    pub async fn checkpoint(&self, time_us: i64) -> Result<(), JetstreamError> {
        self.cursor_store
            .set(CursorRecord::new(time_us, chrono::Utc::now()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tideline_cursor::MemoryCursorStore;

    proptest! {
        #[test]
        fn reconnect_delay_never_leaves_the_spec_window(
            initial_ms in 1u64..5_000,
            max_ms in 5_000u64..120_000,
            attempt in 0u32..12,
        ) {
            let initial = Duration::from_millis(initial_ms);
            let max = Duration::from_millis(max_ms);
            let delay = reconnect_delay(initial, max, attempt);
            let base = (initial.as_secs_f64() * 2f64.powi(attempt as i32)).min(max.as_secs_f64());
            prop_assert!(delay.as_secs_f64() >= base - 1e-9);
            prop_assert!(delay.as_secs_f64() <= base * 1.25 + 1e-9);
        }
    }

    fn client() -> JetstreamClient {
        JetstreamClient::new(JetstreamConfig::default(), Arc::new(MemoryCursorStore::new()))
    }

    #[test]
    fn build_url_without_cursor_has_no_cursor_param() {
        let client = client();
        let url = client.build_url(None);
        assert!(url.contains("wantedCollections=app.bsky.feed.post"));
        assert!(!url.contains("cursor="));
    }

    #[test]
    fn build_url_with_cursor_includes_it() {
        let client = client();
        let url = client.build_url(Some(1_234_567_890));
        assert!(url.contains("cursor=1234567890"));
    }

    #[test]
    fn build_url_with_compress_includes_flag() {
        let mut config = JetstreamConfig::default();
        config.compress = true;
        let client = JetstreamClient::new(config, Arc::new(MemoryCursorStore::new()));
        let url = client.build_url(None);
        assert!(url.contains("compress=true"));
    }

    #[test]
    fn handle_message_ignores_non_post_collections() {
        let client = client();
        let json = r#"{
            "did": "did:plc:test",
            "time_us": 1,
            "kind": "commit",
            "commit": {
                "rev": "a",
                "operation": "create",
                "collection": "app.bsky.feed.like",
                "rkey": "r",
                "record": {"text": "ignored"}
            }
        }"#;
        client.handle_message(json).unwrap();
        let mut rx = client.posts_stream();
        assert!(rx.try_recv().is_err());
        assert_eq!(client.metrics().messages_total, 1);
        assert_eq!(client.metrics().posts_total, 0);
    }

    #[test]
    fn handle_message_emits_post_events() {
        let client = client();
        let json = r#"{
            "did": "did:plc:test",
            "time_us": 42,
            "kind": "commit",
            "commit": {
                "rev": "a",
                "operation": "create",
                "collection": "app.bsky.feed.post",
                "rkey": "r1",
                "record": {"text": "hello world", "createdAt": "2024-01-23T10:00:00Z", "langs": ["en"]},
                "cid": "bafy1"
            }
        }"#;
        let mut rx = client.posts_stream();
        client.handle_message(json).unwrap();

        let post = rx.try_recv().unwrap();
        assert_eq!(post.text, "hello world");
        assert_eq!(post.author_did, "did:plc:test");
        assert_eq!(post.uri, "at://did:plc:test/app.bsky.feed.post/r1");
        assert_eq!(post.languages, vec!["en".to_string()]);
        assert!(!post.is_reply);
        assert_eq!(client.get_last_cursor(), Some(42));
        assert_eq!(client.metrics().posts_total, 1);
    }

    #[test]
    fn handle_message_drops_posts_with_empty_text() {
        let client = client();
        let json = r#"{
            "did": "did:plc:test",
            "time_us": 42,
            "kind": "commit",
            "commit": {
                "rev": "a",
                "operation": "create",
                "collection": "app.bsky.feed.post",
                "rkey": "r1",
                "record": {"text": ""},
                "cid": "bafy1"
            }
        }"#;
        let mut rx = client.posts_stream();
        client.handle_message(json).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn handle_message_drops_posts_with_no_cid() {
        let client = client();
        let json = r#"{
            "did": "did:plc:test",
            "time_us": 42,
            "kind": "commit",
            "commit": {
                "rev": "a",
                "operation": "create",
                "collection": "app.bsky.feed.post",
                "rkey": "r1",
                "record": {"text": "hello"}
            }
        }"#;
        let mut rx = client.posts_stream();
        client.handle_message(json).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn set_last_cursor_overrides_the_observed_cursor() {
        let client = client();
        client.set_last_cursor(999);
        assert_eq!(client.get_last_cursor(), Some(999));
    }

    #[test]
    fn reconnect_delay_stays_within_the_spec_bound() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(60);
        for attempt in 0..10 {
            for _ in 0..50 {
                let delay = reconnect_delay(initial, max, attempt);
                let base = (initial.as_secs_f64() * 2f64.powi(attempt as i32)).min(max.as_secs_f64());
                assert!(delay.as_secs_f64() >= base);
                assert!(delay.as_secs_f64() <= base * 1.25 + 1e-9);
            }
        }
    }

    #[test]
    fn reconnect_delay_is_capped_by_max_backoff() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(10);
        let delay = reconnect_delay(initial, max, 20);
        assert!(delay.as_secs_f64() <= max.as_secs_f64() * 1.25 + 1e-9);
    }

    #[test]
    fn run_guard_rejects_concurrent_acquisition_and_releases_on_drop() {
        let flag = AtomicBool::new(false);
        let first = RunGuard::acquire(&flag).unwrap();
        assert!(matches!(
            RunGuard::acquire(&flag),
            Err(JetstreamError::AlreadyRunning)
        ));
        drop(first);
        assert!(RunGuard::acquire(&flag).is_ok());
    }

    #[test]
    fn reset_reconnect_state_clears_exhaustion() {
        let client = client();
        client
            .max_reconnect_exhausted
            .store(true, Ordering::Relaxed);
        client.reset_reconnect_state();
        assert!(!client.is_max_reconnect_exhausted());
    }
}
