//! Cache key definitions.
//!
//! `CacheKey` identifies edge response-cache entries; KV keys are plain
//! strings built by [`kv_key`].

use std::fmt;

use axum::http::{HeaderMap, Method, Uri};

/// Namespace prefix for API responses held in the KV store.
pub const KV_API_NAMESPACE: &str = "api";

/// Normalized identity of an edge response-cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: Method,
    /// Normalized URL: lower-case scheme and authority, no fragment.
    pub url: String,
    /// Values of the vary-relevant request headers, in configuration order.
    pub vary: Vec<(String, String)>,
}

impl CacheKey {
    /// Build a key from request parts, keeping only the named vary headers.
    pub fn from_parts(method: &Method, uri: &Uri, headers: &HeaderMap, vary: &[String]) -> Self {
        let vary = vary
            .iter()
            .map(|name| {
                let name = name.to_ascii_lowercase();
                let value = headers
                    .get(name.as_str())
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .trim()
                    .to_string();
                (name, value)
            })
            .collect();

        Self {
            method: method.clone(),
            url: normalize_url(uri),
            vary,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)?;
        for (name, value) in &self.vary {
            write!(f, " {name}={value}")?;
        }
        Ok(())
    }
}

/// Normalize a request URI for use in a cache key.
///
/// Scheme and authority are case-insensitive and lower-cased; a missing path
/// becomes `/`. Origin-form URIs (path only) are kept as-is.
pub fn normalize_url(uri: &Uri) -> String {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|pq| !pq.is_empty())
        .unwrap_or("/");

    match (uri.scheme_str(), uri.authority()) {
        (Some(scheme), Some(authority)) => format!(
            "{}://{}{}",
            scheme.to_ascii_lowercase(),
            authority.as_str().to_ascii_lowercase(),
            path_and_query
        ),
        _ => path_and_query.to_string(),
    }
}

/// KV key for an API response: namespace, path and raw query (with `?`).
pub fn kv_key(uri: &Uri) -> String {
    let search = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
    format!("{KV_API_NAMESPACE}:{}:{search}", uri.path())
}
