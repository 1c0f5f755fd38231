//! Edge executor.
//!
//! Runs one request through CLASSIFY → STRATEGY → CACHE_LOOKUP and, on a
//! miss, ORIGIN_FETCH → conditional store. Non-GET requests skip the lookup
//! and store phases entirely and are forwarded as-is.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE},
    },
    response::Response,
};
use http_body_util::BodyExt;
use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::cache::{
    CacheConfig, CacheKey, CachedResponse, DeferredTasks, KvStore, ObjectStore, ResponseStore,
    StoreError, kv_key,
};
use crate::lifecycle::{CacheGeneration, Generations};
use crate::routing::{Classifier, EdgeRules, EdgeStrategy, ResourceClass};

use super::origin::{Origin, OriginError};

pub const X_CACHE_STATUS: HeaderName = HeaderName::from_static("x-cache-status");
pub const X_CACHE_SOURCE: HeaderName = HeaderName::from_static("x-cache-source");
pub const X_STORAGE_SOURCE: HeaderName = HeaderName::from_static("x-storage-source");

const HIT: HeaderValue = HeaderValue::from_static("HIT");
const MISS: HeaderValue = HeaderValue::from_static("MISS");
const SOURCE_KV: HeaderValue = HeaderValue::from_static("KV");
const SOURCE_ORIGIN: HeaderValue = HeaderValue::from_static("ORIGIN");
const APPLICATION_JSON: HeaderValue = HeaderValue::from_static("application/json");
const OCTET_STREAM: &str = "application/octet-stream";

/// Storage and origin handles the executor works against.
#[derive(Clone)]
pub struct EdgeCapabilities {
    pub responses: Arc<dyn ResponseStore>,
    pub kv: Arc<dyn KvStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub origin: Arc<dyn Origin>,
}

pub struct EdgeExecutor {
    classifier: Classifier,
    rules: Arc<EdgeRules>,
    cache: CacheConfig,
    caps: EdgeCapabilities,
    generations: Arc<Generations>,
    deferred: DeferredTasks,
}

impl EdgeExecutor {
    pub fn new(
        rules: Arc<EdgeRules>,
        cache: CacheConfig,
        caps: EdgeCapabilities,
        generations: Arc<Generations>,
    ) -> Self {
        Self {
            classifier: Classifier::new(rules.clone()),
            rules,
            cache,
            caps,
            generations,
            deferred: DeferredTasks::new(),
        }
    }

    pub fn current_generation(&self) -> CacheGeneration {
        self.generations.current()
    }

    /// Switch to a new generation; entries from older ones stop matching.
    pub async fn rotate_generation(&self, name: impl Into<String>) -> CacheGeneration {
        self.generations
            .rotate(name, self.caps.responses.as_ref())
            .await
    }

    /// Background writes still in flight.
    pub fn pending_writes(&self) -> usize {
        self.deferred.pending()
    }

    #[cfg(test)]
    pub(crate) fn deferred(&self) -> &DeferredTasks {
        &self.deferred
    }

    /// Classify a request and pick its strategy without executing it.
    pub fn plan(&self, request: &Request<Body>) -> (ResourceClass, EdgeStrategy) {
        let class = self
            .classifier
            .classify(request.method(), request.uri(), request.headers());
        (class, EdgeStrategy::for_class(class))
    }

    #[instrument(
        skip_all,
        fields(method = %request.method(), path = %request.uri().path())
    )]
    pub async fn handle(&self, request: Request<Body>) -> Result<Response, OriginError> {
        let (class, strategy) = self.plan(&request);

        if request.method() != Method::GET && strategy != EdgeStrategy::Bypass {
            debug!(class = %class, strategy = %strategy, "non-GET request, forwarding");
            return self.caps.origin.fetch(request).await;
        }

        debug!(class = %class, strategy = %strategy, "dispatching");

        match strategy {
            strategy if strategy.uses_response_cache() => {
                self.response_cached(request, strategy).await
            }
            EdgeStrategy::KvTtl => self.kv_cached(request).await,
            EdgeStrategy::ObjectPassthrough => self.object_passthrough(request).await,
            _ => self.caps.origin.fetch(request).await,
        }
    }

    async fn response_cached(
        &self,
        request: Request<Body>,
        strategy: EdgeStrategy,
    ) -> Result<Response, OriginError> {
        let key = CacheKey::from_parts(
            request.method(),
            request.uri(),
            request.headers(),
            &self.rules.vary_headers,
        );
        let generation_id = self.generations.current_id();

        if self.cache.enable_response_cache {
            match self.caps.responses.lookup(&key).await {
                Ok(Some(cached)) if cached.generation_id == generation_id => {
                    record_hit(strategy);
                    debug!(cache = "response", outcome = "hit", key = %key, "serving cached response");
                    let mut response = cached.to_response();
                    response.headers_mut().insert(X_CACHE_STATUS, HIT);
                    return Ok(response);
                }
                Ok(_) => {}
                Err(err) => absorb_store_error("response", &err),
            }
        }

        record_miss(strategy);
        debug!(cache = "response", outcome = "miss", key = %key, "fetching origin");

        let response = self.caps.origin.fetch(request).await?;
        if !response.status().is_success() {
            return Ok(response);
        }

        let (cache_control, ttl) = match strategy {
            EdgeStrategy::CacheFirstImmutable => (
                self.rules.immutable_cache_control(),
                self.rules.immutable_ttl(),
            ),
            _ => (
                self.rules.page_cache_control(),
                self.rules.page_shared_ttl(),
            ),
        };

        let (mut parts, body) = response.into_parts();
        if let Ok(value) = HeaderValue::from_str(&cache_control) {
            parts.headers.insert(CACHE_CONTROL, value);
        }
        parts.headers.insert(X_CACHE_STATUS, MISS);

        let bytes = body
            .collect()
            .await
            .map_err(|err| OriginError::body(err.to_string()))?
            .to_bytes();

        if self.cache.enable_response_cache && is_storable(&parts.headers) {
            let cached =
                CachedResponse::new(parts.status, &parts.headers, bytes.clone(), ttl, generation_id);
            let store = self.caps.responses.clone();
            self.deferred
                .spawn("response.put", async move { store.put(key, cached).await });
        }

        Ok(Response::from_parts(parts, Body::from(bytes)))
    }

    async fn kv_cached(&self, request: Request<Body>) -> Result<Response, OriginError> {
        let key = kv_key(request.uri());

        match self.caps.kv.get(&key).await {
            Ok(Some(value)) => {
                record_hit(EdgeStrategy::KvTtl);
                debug!(cache = "kv", outcome = "hit", key = %key, "serving cached API response");
                return Ok(kv_hit_response(value));
            }
            Ok(None) => {}
            Err(err) => absorb_store_error("kv", &err),
        }

        record_miss(EdgeStrategy::KvTtl);
        debug!(cache = "kv", outcome = "miss", key = %key, "fetching origin");

        let response = self.caps.origin.fetch(request).await?;
        if response.status() != StatusCode::OK {
            return Ok(response);
        }

        let (mut parts, body) = response.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|err| OriginError::body(err.to_string()))?
            .to_bytes();

        match std::str::from_utf8(&bytes) {
            Ok(text) => {
                if let Err(err) = self
                    .caps
                    .kv
                    .put(&key, text.to_string(), self.rules.api_ttl())
                    .await
                {
                    absorb_store_error("kv", &err);
                }
            }
            Err(_) => warn!(key = %key, "origin body is not UTF-8, not persisting"),
        }

        if !parts.headers.contains_key(CONTENT_TYPE) {
            parts.headers.insert(CONTENT_TYPE, APPLICATION_JSON);
        }
        parts.headers.insert(X_CACHE_STATUS, MISS);
        parts.headers.insert(X_CACHE_SOURCE, SOURCE_ORIGIN);

        Ok(Response::from_parts(parts, Body::from(bytes)))
    }

    async fn object_passthrough(&self, request: Request<Body>) -> Result<Response, OriginError> {
        let object_key = request
            .uri()
            .path()
            .strip_prefix(self.rules.object_prefix.as_str())
            .unwrap_or_default();

        if !object_key.is_empty() {
            match self.caps.objects.get(object_key).await {
                Ok(Some(record)) => {
                    record_hit(EdgeStrategy::ObjectPassthrough);
                    debug!(cache = "object", outcome = "hit", object_key, "streaming object");

                    let content_type = record
                        .content_type
                        .as_deref()
                        .and_then(|value| HeaderValue::from_str(value).ok())
                        .unwrap_or(HeaderValue::from_static(OCTET_STREAM));

                    let mut response = Response::new(Body::from_stream(record.body));
                    let headers = response.headers_mut();
                    headers.insert(CONTENT_TYPE, content_type);
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(record.size));
                    if let Ok(value) = HeaderValue::from_str(&self.rules.object_cache_control()) {
                        headers.insert(CACHE_CONTROL, value);
                    }
                    if let Ok(value) = HeaderValue::from_str(&self.rules.object_source_label) {
                        headers.insert(X_STORAGE_SOURCE, value);
                    }
                    return Ok(response);
                }
                Ok(None) => {
                    debug!(cache = "object", outcome = "miss", object_key, "object not found");
                }
                Err(err) => absorb_store_error("object", &err),
            }
        }

        record_miss(EdgeStrategy::ObjectPassthrough);
        self.caps.origin.fetch(request).await
    }
}

fn kv_hit_response(value: String) -> Response {
    let mut response = Response::new(Body::from(value));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, APPLICATION_JSON);
    headers.insert(X_CACHE_STATUS, HIT);
    headers.insert(X_CACHE_SOURCE, SOURCE_KV);
    response
}

fn is_storable(headers: &HeaderMap) -> bool {
    !headers.contains_key(SET_COOKIE)
}

fn absorb_store_error(store: &'static str, err: &StoreError) {
    counter!("tiercache_store_error_total", "store" => store).increment(1);
    warn!(store, error = %err, "store error treated as miss");
}

fn record_hit(strategy: EdgeStrategy) {
    counter!("tiercache_edge_hit_total", "strategy" => strategy.as_str()).increment(1);
}

fn record_miss(strategy: EdgeStrategy) {
    counter!("tiercache_edge_miss_total", "strategy" => strategy.as_str()).increment(1);
}
