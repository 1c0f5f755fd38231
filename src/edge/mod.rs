//! Edge tier: a reverse proxy in front of the origin that serves what it can
//! from the response cache, the KV store and the object store.

mod executor;
mod origin;


pub use executor::{
    EdgeCapabilities, EdgeExecutor, X_CACHE_SOURCE, X_CACHE_STATUS, X_STORAGE_SOURCE,
};
pub use origin::{Origin, OriginError, ReqwestOrigin};
