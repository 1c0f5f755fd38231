//! Cache store configuration.
//!
//! Controls the in-memory edge stores via `tiercache.toml`.

use std::num::NonZeroUsize;

use serde::Deserialize;

const DEFAULT_RESPONSE_LIMIT: usize = 1024;
const DEFAULT_KV_LIMIT: usize = 4096;

/// Cache configuration from `tiercache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the edge response cache. When off, response-cache strategies
    /// always miss and never store.
    pub enable_response_cache: bool,
    /// Maximum responses held by the in-memory response store.
    pub response_limit: usize,
    /// Maximum live keys held by the in-memory KV store.
    pub kv_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_response_cache: true,
            response_limit: DEFAULT_RESPONSE_LIMIT,
            kv_limit: DEFAULT_KV_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enable_response_cache: settings.enable_response_cache,
            response_limit: settings.response_limit,
            kv_limit: settings.kv_limit,
        }
    }
}

impl CacheConfig {
    /// Returns the response limit as NonZeroUsize, clamping to 1 if zero.
    pub fn response_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.response_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the KV limit, clamping to 1 if zero.
    pub fn kv_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.kv_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
