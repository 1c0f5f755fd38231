//! Cache store abstractions.
//!
//! Three backends with different consistency guarantees:
//!
//! - [`ResponseStore`]: ephemeral snapshots of full HTTP responses.
//! - [`KvStore`]: durable string values with a per-entry TTL.
//! - [`ObjectStore`]: durable binary blobs without TTL.
//!
//! Callers treat every [`StoreError`] as a miss; a store failure never fails
//! the request that triggered it.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;
use time::OffsetDateTime;

use super::keys::CacheKey;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{store} store unavailable: {message}")]
    Unavailable {
        store: &'static str,
        message: String,
    },
    #[error("ttl must be greater than zero")]
    InvalidTtl,
    #[error("{store} store is full")]
    Full { store: &'static str },
}

impl StoreError {
    pub fn unavailable(store: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            store,
            message: message.into(),
        }
    }
}

/// Snapshot of an HTTP response held by the edge response cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Bytes,
    pub stored_at: OffsetDateTime,
    /// Shared lifetime of the entry; a lookup past it is a miss.
    pub ttl: Duration,
    pub generation_id: u64,
}

impl CachedResponse {
    pub fn new(
        status: StatusCode,
        headers: &HeaderMap,
        body: Bytes,
        ttl: Duration,
        generation_id: u64,
    ) -> Self {
        let headers = headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Self {
            status,
            headers,
            body,
            stored_at: OffsetDateTime::now_utc(),
            ttl,
            generation_id,
        }
    }

    /// Rebuild a response; every call yields an independent body.
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }

        response
    }
}

/// Edge response cache.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    /// Return the live entry for `key`, or `None` when absent or expired.
    async fn lookup(&self, key: &CacheKey) -> Result<Option<CachedResponse>, StoreError>;

    /// Store an entry, atomically replacing any previous one (last write wins).
    async fn put(&self, key: CacheKey, response: CachedResponse) -> Result<(), StoreError>;

    /// Drop every entry not stamped with `generation_id`. Returns the number evicted.
    async fn evict_except(&self, generation_id: u64) -> Result<usize, StoreError>;
}

/// Durable key-value store with per-entry TTL.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a live value; an expired entry is reported as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` for `ttl`. A zero TTL is rejected.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

pub type ObjectBody = BoxStream<'static, Result<Bytes, io::Error>>;

/// A stored object with its metadata.
pub struct ObjectRecord {
    pub object_key: String,
    pub content_type: Option<String>,
    pub size: u64,
    pub body: ObjectBody,
}

impl std::fmt::Debug for ObjectRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRecord")
            .field("object_key", &self.object_key)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Durable blob store. Objects live until explicitly deleted.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, object_key: &str) -> Result<Option<ObjectRecord>, StoreError>;

    async fn put(
        &self,
        object_key: &str,
        content_type: Option<String>,
        body: Bytes,
    ) -> Result<(), StoreError>;

    async fn delete(&self, object_key: &str) -> Result<(), StoreError>;
}
