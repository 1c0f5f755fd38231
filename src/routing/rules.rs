//! Routing tables loaded from configuration.

use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use super::ClientStrategy;

/// Edge allow-lists, prefixes and cache lifetimes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EdgeRules {
    /// Path suffixes served as immutable static assets.
    pub static_extensions: Vec<String>,
    /// Bundle prefixes served as immutable static assets.
    pub static_prefixes: Vec<String>,
    /// Prefix of paths backed by the object store.
    pub object_prefix: String,
    pub api_prefix: String,
    /// Side-effect-free API endpoints (prefix match) cached in KV.
    pub api_cacheable: Vec<String>,
    /// Pages cached at the edge for anonymous visitors (exact match).
    pub public_pages: Vec<String>,
    /// Substring of the `Cookie` header that marks a signed-in session.
    pub session_cookie_marker: String,
    pub immutable_max_age_secs: u64,
    pub api_ttl_secs: u64,
    pub page_max_age_secs: u64,
    pub page_shared_max_age_secs: u64,
    pub object_max_age_secs: u64,
    /// Value of `X-Storage-Source` on object responses.
    pub object_source_label: String,
    /// Request headers that take part in the response-cache key.
    pub vary_headers: Vec<String>,
}

impl Default for EdgeRules {
    fn default() -> Self {
        Self {
            static_extensions: [
                ".js", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff",
                ".woff2", ".ttf", ".eot", ".webp", ".avif",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            static_prefixes: vec!["/_next/static/".to_string()],
            object_prefix: "/uploads/".to_string(),
            api_prefix: "/api/".to_string(),
            api_cacheable: vec![
                "/api/health".to_string(),
                "/api/suppliers".to_string(),
                "/api/pncp/opportunities".to_string(),
            ],
            public_pages: vec!["/".to_string(), "/login".to_string(), "/register".to_string()],
            session_cookie_marker: "auth-token".to_string(),
            immutable_max_age_secs: 31_536_000,
            api_ttl_secs: 300,
            page_max_age_secs: 300,
            page_shared_max_age_secs: 3600,
            object_max_age_secs: 86_400,
            object_source_label: "R2".to_string(),
            vary_headers: vec!["accept-encoding".to_string()],
        }
    }
}

impl EdgeRules {
    pub fn immutable_cache_control(&self) -> String {
        format!("public, max-age={}, immutable", self.immutable_max_age_secs)
    }

    pub fn page_cache_control(&self) -> String {
        format!(
            "public, max-age={}, s-maxage={}",
            self.page_max_age_secs, self.page_shared_max_age_secs
        )
    }

    pub fn object_cache_control(&self) -> String {
        format!("public, max-age={}", self.object_max_age_secs)
    }

    pub fn immutable_ttl(&self) -> Duration {
        Duration::from_secs(self.immutable_max_age_secs)
    }

    pub fn page_shared_ttl(&self) -> Duration {
        Duration::from_secs(self.page_shared_max_age_secs)
    }

    pub fn api_ttl(&self) -> Duration {
        Duration::from_secs(self.api_ttl_secs)
    }
}

/// Raw client strategy table: regular expressions matched against the path.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientStrategyTable {
    pub cache_first: Vec<String>,
    pub network_first: Vec<String>,
    pub stale_while_revalidate: Vec<String>,
}

impl Default for ClientStrategyTable {
    fn default() -> Self {
        Self {
            cache_first: vec![
                r"\.(js|css|woff|woff2|ttf|eot)$".to_string(),
                r"/icons/".to_string(),
                r"/images/".to_string(),
            ],
            network_first: vec![
                r"/api/".to_string(),
                r"supabase".to_string(),
                r"pncp\.gov\.br".to_string(),
            ],
            stale_while_revalidate: vec![
                r"/dashboard".to_string(),
                r"/cotai".to_string(),
                r"/pncp".to_string(),
            ],
        }
    }
}

/// Compiled client strategy table, checked in order.
#[derive(Debug, Clone)]
pub struct ClientRules {
    patterns: Vec<(ClientStrategy, Regex)>,
}

impl ClientRules {
    pub fn compile(table: &ClientStrategyTable) -> Result<Self, regex::Error> {
        let groups = [
            (ClientStrategy::CacheFirst, &table.cache_first),
            (ClientStrategy::NetworkFirst, &table.network_first),
            (
                ClientStrategy::StaleWhileRevalidate,
                &table.stale_while_revalidate,
            ),
        ];

        let mut patterns = Vec::new();
        for (strategy, sources) in groups {
            for source in sources {
                patterns.push((strategy, Regex::new(source)?));
            }
        }

        Ok(Self { patterns })
    }

    /// First matching strategy; NETWORK_FIRST when nothing matches.
    pub fn select(&self, path: &str) -> ClientStrategy {
        self.patterns
            .iter()
            .find(|(_, pattern)| pattern.is_match(path))
            .map(|(strategy, _)| *strategy)
            .unwrap_or(ClientStrategy::NetworkFirst)
    }
}

impl Default for ClientRules {
    fn default() -> Self {
        Self::compile(&ClientStrategyTable::default())
            .unwrap_or_else(|_| Self { patterns: Vec::new() })
    }
}
