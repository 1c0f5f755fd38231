//! Request classification and strategy selection.
//!
//! Both are pure functions over immutable routing tables: the classifier maps
//! a request onto a closed [`ResourceClass`], and each tier maps that class
//! (edge) or the request path (client) onto a caching strategy.

mod classifier;
mod rules;
mod strategy;

use std::fmt;

pub use classifier::Classifier;
pub use rules::{ClientRules, ClientStrategyTable, EdgeRules};
pub use strategy::{ClientStrategy, EdgeStrategy};

/// Closed set of request classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    StaticAsset,
    ApiCacheable,
    ApiBypass,
    DocumentObject,
    PagePublic,
    /// No rule matched; never cached.
    Unclassified,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StaticAsset => "static_asset",
            Self::ApiCacheable => "api_cacheable",
            Self::ApiBypass => "api_bypass",
            Self::DocumentObject => "document_object",
            Self::PagePublic => "page_public",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
