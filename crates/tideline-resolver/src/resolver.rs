use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ResolverError;
use crate::metrics::{ResolverMetrics, ResolverMetricsInner};

const DEFAULT_API_BASE: &str = "https://public.api.bsky.app";
const DEFAULT_CAPACITY: u64 = 100_000;
const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_BATCH_SIZE: usize = 25;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub api_base_url: String,
    pub max_cache_size: u64,
    pub cache_ttl: Duration,
    pub batch_size: usize,
    pub request_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            max_cache_size: DEFAULT_CAPACITY,
            cache_ttl: DEFAULT_TTL,
            batch_size: DEFAULT_BATCH_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    handle: String,
}

#[derive(Debug, Deserialize)]
struct ProfilesResponse {
    profiles: Vec<ProfileSummary>,
}

#[derive(Debug, Deserialize)]
struct ProfileSummary {
    did: String,
    handle: String,
}

/// A single entry of a batched [`DidResolver::resolve_handles`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHandle {
    pub id: String,
    pub handle: Option<String>,
    pub from_cache: bool,
}

/// Resolves opaque author identifiers to Bluesky handles through a bounded
/// LRU+TTL cache, deduplicating concurrent lookups for the same id via
/// moka's single-flight `try_get_with`, and batching cache misses into
/// `getProfiles` requests bounded by `batch_size`.
pub struct DidResolver {
    config: ResolverConfig,
    http: reqwest::Client,
    cache: Cache<String, String>,
    metrics: Arc<ResolverMetricsInner>,
}

impl DidResolver {
    pub fn new(config: ResolverConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.request_timeout * 2)
            .build()
            .expect("reqwest client builder should not fail with these settings");

        let cache = Cache::builder()
            .max_capacity(config.max_cache_size)
            .time_to_live(config.cache_ttl)
            .build();

        Self {
            config,
            http,
            cache,
            metrics: Arc::new(ResolverMetricsInner::default()),
        }
    }

    pub fn metrics(&self) -> ResolverMetrics {
        self.metrics.snapshot(self.cache.entry_count())
    }

    /// Resolve a single id to its handle, falling back to the id itself on
    /// any failure (validation, not-found, rate-limit, timeout).
    pub async fn resolve_handle(&self, id: &str) -> String {
        self.resolve_handle_or_null(id)
            .await
            .unwrap_or_else(|| id.to_string())
    }

    /// Resolve a single id to its handle, returning `None` on any failure.
    pub async fn resolve_handle_or_null(&self, id: &str) -> Option<String> {
        if let Err(e) = validate_id(id) {
            debug!(id = %id, error = %e, "id failed validation, skipping resolution");
            return None;
        }

        self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);

        if let Some(handle) = self.cache.get(id).await {
            self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Some(handle);
        }
        self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);

        let id_owned = id.to_string();
        let http = self.http.clone();
        let api_base = self.config.api_base_url.clone();
        let timeout = self.config.request_timeout;

        let result = self
            .cache
            .try_get_with(id_owned.clone(), async move {
                fetch_single(&http, &api_base, &id_owned, timeout).await
            })
            .await;

        match result {
            Ok(handle) => Some(handle),
            Err(e) => {
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                warn!(id = %id, error = %e, "failed to resolve handle");
                None
            }
        }
    }

    /// Resolve many ids, tagging each result with whether it came from
    /// cache. Uncached ids are chunked into `getProfiles` requests bounded
    /// by `batch_size`.
    pub async fn resolve_handles(&self, ids: &[String]) -> Vec<ResolvedHandle> {
        let mut results: HashMap<String, ResolvedHandle> = HashMap::new();
        let mut uncached = Vec::new();

        for id in ids {
            if validate_id(id).is_err() {
                results.insert(
                    id.clone(),
                    ResolvedHandle {
                        id: id.clone(),
                        handle: None,
                        from_cache: false,
                    },
                );
                continue;
            }

            self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
            if let Some(handle) = self.cache.get(id).await {
                self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
                results.insert(
                    id.clone(),
                    ResolvedHandle {
                        id: id.clone(),
                        handle: Some(handle),
                        from_cache: true,
                    },
                );
            } else {
                self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);
                uncached.push(id.clone());
            }
        }

        for chunk in uncached.chunks(self.config.batch_size.max(1)) {
            let fetched = self.fetch_batch(chunk).await;
            for id in chunk {
                let handle = fetched.get(id).cloned();
                if let Some(handle) = &handle {
                    self.cache.insert(id.clone(), handle.clone()).await;
                }
                results.insert(
                    id.clone(),
                    ResolvedHandle {
                        id: id.clone(),
                        handle,
                        from_cache: false,
                    },
                );
            }
        }

        ids.iter()
            .map(|id| {
                results.remove(id).unwrap_or(ResolvedHandle {
                    id: id.clone(),
                    handle: None,
                    from_cache: false,
                })
            })
            .collect()
    }

    /// Resolve and cache a set of ids without returning anything; used to
    /// pre-warm the cache ahead of a burst of lookups.
    pub async fn warm_cache(&self, ids: &[String]) {
        let _ = self.resolve_handles(ids).await;
    }

    async fn fetch_batch(&self, ids: &[String]) -> HashMap<String, String> {
        if ids.is_empty() {
            return HashMap::new();
        }

        let batch_timeout = self.config.request_timeout * 2;
        let url = format!(
            "{}/xrpc/app.bsky.actor.getProfiles?{}",
            self.config.api_base_url,
            ids.iter()
                .map(|id| format!("actors={id}"))
                .collect::<Vec<_>>()
                .join("&")
        );

        let request = self.http.get(&url).send();
        let response = match tokio::time::timeout(batch_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(error = %e, batch_size = ids.len(), "batch did resolution request failed");
                self.metrics
                    .failures
                    .fetch_add(ids.len() as u64, Ordering::Relaxed);
                return HashMap::new();
            }
            Err(_) => {
                warn!(batch_size = ids.len(), "batch did resolution timed out");
                self.metrics
                    .failures
                    .fetch_add(ids.len() as u64, Ordering::Relaxed);
                return HashMap::new();
            }
        };

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!(batch_size = ids.len(), "batch did resolution rate limited");
            self.metrics
                .failures
                .fetch_add(ids.len() as u64, Ordering::Relaxed);
            return HashMap::new();
        }

        if !response.status().is_success() {
            warn!(status = %response.status(), batch_size = ids.len(), "batch did resolution failed");
            self.metrics
                .failures
                .fetch_add(ids.len() as u64, Ordering::Relaxed);
            return HashMap::new();
        }

        match response.json::<ProfilesResponse>().await {
            Ok(body) => body
                .profiles
                .into_iter()
                .map(|p| (p.did, p.handle))
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to parse batch did resolution response");
                self.metrics
                    .failures
                    .fetch_add(ids.len() as u64, Ordering::Relaxed);
                HashMap::new()
            }
        }
    }
}

/// Ids must be non-empty and carry a recognizable scheme prefix
/// (`did:...`). Validation failures are not counted as upstream failures.
fn validate_id(id: &str) -> Result<(), ResolverError> {
    if id.is_empty() {
        return Err(ResolverError::Validation("empty id".to_string()));
    }
    if !id.contains(':') {
        return Err(ResolverError::Validation(format!(
            "missing scheme prefix: {id}"
        )));
    }
    Ok(())
}

async fn fetch_single(
    http: &reqwest::Client,
    api_base: &str,
    id: &str,
    timeout: Duration,
) -> Result<String, ResolverError> {
    let url = format!("{api_base}/xrpc/app.bsky.actor.getProfile?actor={id}");
    debug!(id = %id, url = %url, "resolving handle");

    let request = http.get(&url).send();
    let response = tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| ResolverError::Timeout(id.to_string()))?
        .map_err(|e| ResolverError::TransientNetwork {
            id: id.to_string(),
            source: e.to_string(),
        })?;

    match response.status() {
        reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::BAD_REQUEST => {
            return Err(ResolverError::NotFound(id.to_string()));
        }
        reqwest::StatusCode::TOO_MANY_REQUESTS => {
            return Err(ResolverError::RateLimited(id.to_string()));
        }
        status if !status.is_success() => {
            return Err(ResolverError::TransientNetwork {
                id: id.to_string(),
                source: format!("unexpected status {status}"),
            });
        }
        _ => {}
    }

    response
        .json::<ProfileResponse>()
        .await
        .map(|body| body.handle)
        .map_err(|e| ResolverError::Malformed {
            id: id.to_string(),
            source: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> ResolverConfig {
        ResolverConfig {
            api_base_url: server.uri(),
            ..ResolverConfig::default()
        }
    }

    #[tokio::test]
    async fn resolves_and_caches_a_single_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.actor.getProfile"))
            .and(query_param("actor", "did:plc:abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "handle": "alice.bsky.social"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = DidResolver::new(config_for(&server));
        let first = resolver.resolve_handle_or_null("did:plc:abc123").await;
        let second = resolver.resolve_handle_or_null("did:plc:abc123").await;

        assert_eq!(first, Some("alice.bsky.social".to_string()));
        assert_eq!(second, Some("alice.bsky.social".to_string()));

        let metrics = resolver.metrics();
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.cache_misses, 1);
        assert_eq!(metrics.total_requests, 2);
    }

    #[tokio::test]
    async fn validation_failure_is_not_counted_as_a_failure() {
        let server = MockServer::start().await;
        let resolver = DidResolver::new(config_for(&server));

        assert_eq!(resolver.resolve_handle_or_null("").await, None);
        assert_eq!(resolver.resolve_handle_or_null("no-scheme").await, None);
        assert_eq!(resolver.metrics().total_requests, 0);
        assert_eq!(resolver.metrics().failures, 0);
    }

    #[tokio::test]
    async fn not_found_increments_failures_and_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.actor.getProfile"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let resolver = DidResolver::new(config_for(&server));
        let result = resolver.resolve_handle_or_null("did:plc:missing").await;
        assert_eq!(result, None);
        assert_eq!(resolver.metrics().failures, 1);
    }

    #[tokio::test]
    async fn resolve_handle_falls_back_to_the_id_on_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.actor.getProfile"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let resolver = DidResolver::new(config_for(&server));
        let result = resolver.resolve_handle("did:plc:missing").await;
        assert_eq!(result, "did:plc:missing");
    }

    #[tokio::test]
    async fn resolve_handles_tags_cache_hits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.actor.getProfiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "profiles": [{"did": "did:plc:a", "handle": "a.bsky.social"}]
            })))
            .mount(&server)
            .await;

        let resolver = DidResolver::new(config_for(&server));
        let first = resolver
            .resolve_handles(&["did:plc:a".to_string()])
            .await;
        assert_eq!(first[0].from_cache, false);
        assert_eq!(first[0].handle, Some("a.bsky.social".to_string()));

        let second = resolver
            .resolve_handles(&["did:plc:a".to_string()])
            .await;
        assert_eq!(second[0].from_cache, true);
    }

    #[tokio::test]
    async fn rate_limited_batch_increments_failures_by_batch_size() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.actor.getProfiles"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let resolver = DidResolver::new(config_for(&server));
        let ids = vec!["did:plc:a".to_string(), "did:plc:b".to_string()];
        let result = resolver.resolve_handles(&ids).await;

        assert!(result.iter().all(|r| r.handle.is_none()));
        assert_eq!(resolver.metrics().failures, 2);
    }
}
