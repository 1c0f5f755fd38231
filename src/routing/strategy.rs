//! Strategy selection for both tiers.

use std::fmt;

use super::ResourceClass;

/// Caching algorithm run by the edge executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeStrategy {
    /// Response cache, one-year immutable lifetime.
    CacheFirstImmutable,
    /// KV store with a short TTL.
    KvTtl,
    /// Stream from the object store, fall through to origin.
    ObjectPassthrough,
    /// Response cache with short browser / longer shared lifetime.
    EdgeCacheTtl,
    Bypass,
}

impl EdgeStrategy {
    pub fn for_class(class: ResourceClass) -> Self {
        match class {
            ResourceClass::StaticAsset => Self::CacheFirstImmutable,
            ResourceClass::ApiCacheable => Self::KvTtl,
            ResourceClass::DocumentObject => Self::ObjectPassthrough,
            ResourceClass::PagePublic => Self::EdgeCacheTtl,
            ResourceClass::ApiBypass | ResourceClass::Unclassified => Self::Bypass,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheFirstImmutable => "cache_first_immutable",
            Self::KvTtl => "kv_ttl",
            Self::ObjectPassthrough => "object_passthrough",
            Self::EdgeCacheTtl => "edge_cache_ttl",
            Self::Bypass => "bypass",
        }
    }

    /// Strategies backed by the edge response cache.
    pub fn uses_response_cache(&self) -> bool {
        matches!(self, Self::CacheFirstImmutable | Self::EdgeCacheTtl)
    }
}

impl fmt::Display for EdgeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caching algorithm run by the client executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientStrategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

impl ClientStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheFirst => "cache_first",
            Self::NetworkFirst => "network_first",
            Self::StaleWhileRevalidate => "stale_while_revalidate",
        }
    }
}

impl fmt::Display for ClientStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
