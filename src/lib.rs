//! Two-tier HTTP caching and request routing.
//!
//! The edge tier ([`edge`]) is a reverse proxy that classifies each request
//! and serves it from a response cache, a TTL key-value store or an object
//! store before falling back to the origin. The client tier ([`client`])
//! applies the same classify-then-dispatch shape inside a client runtime and
//! adds offline fallbacks, push notifications and background sync.

pub mod cache;
pub mod client;
pub mod config;
pub mod edge;
pub mod error;
pub mod infra;
pub mod lifecycle;
pub mod routing;
