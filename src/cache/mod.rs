//! Cache store abstraction.
//!
//! Three backends sit behind traits so the edge executor can be handed real
//! platform bindings or in-memory fakes:
//!
//! - **Response store**: full HTTP response snapshots keyed by [`CacheKey`]
//! - **KV store**: TTL'd string values (API JSON)
//! - **Object store**: binary blobs with content-type metadata
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enable_response_cache = true
//! response_limit = 1024
//! kv_limit = 4096
//! ```

mod config;
mod deferred;
mod keys;
mod lock;
mod memory;
mod store;

pub use config::CacheConfig;
pub use deferred::DeferredTasks;
pub use keys::{CacheKey, KV_API_NAMESPACE, kv_key, normalize_url};
pub(crate) use lock::{mutex_lock, rw_read, rw_write};
pub use memory::{MemoryKvStore, MemoryObjectStore, MemoryResponseStore, StoreStats};
pub use store::{
    CachedResponse, KvStore, ObjectBody, ObjectRecord, ObjectStore, ResponseStore, StoreError,
};
