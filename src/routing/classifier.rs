//! Request classification.

use std::sync::Arc;

use axum::http::{
    HeaderMap, Method, Uri,
    header::{AUTHORIZATION, COOKIE},
};

use super::{EdgeRules, ResourceClass};

/// Maps `(method, path, headers)` onto a [`ResourceClass`]. First match wins.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Arc<EdgeRules>,
}

impl Classifier {
    pub fn new(rules: Arc<EdgeRules>) -> Self {
        Self { rules }
    }

    pub fn classify(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> ResourceClass {
        let path = uri.path();
        let rules = &*self.rules;

        if self.is_static_asset(path) {
            return ResourceClass::StaticAsset;
        }

        if path.starts_with(rules.object_prefix.as_str()) {
            return ResourceClass::DocumentObject;
        }

        if path.starts_with(rules.api_prefix.as_str()) {
            if method != Method::GET {
                return ResourceClass::ApiBypass;
            }
            let allowed = rules
                .api_cacheable
                .iter()
                .any(|endpoint| path.starts_with(endpoint.as_str()));
            return if allowed {
                ResourceClass::ApiCacheable
            } else {
                ResourceClass::ApiBypass
            };
        }

        if method == Method::GET
            && rules.public_pages.iter().any(|page| page == path)
            && !self.has_credentials(headers)
        {
            return ResourceClass::PagePublic;
        }

        ResourceClass::Unclassified
    }

    fn is_static_asset(&self, path: &str) -> bool {
        self.rules
            .static_extensions
            .iter()
            .any(|ext| path.ends_with(ext.as_str()))
            || self
                .rules
                .static_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }

    fn has_credentials(&self, headers: &HeaderMap) -> bool {
        if headers.contains_key(AUTHORIZATION) {
            return true;
        }
        let marker = self.rules.session_cookie_marker.as_str();
        !marker.is_empty()
            && headers
                .get_all(COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .any(|cookie| cookie.contains(marker))
    }
}
