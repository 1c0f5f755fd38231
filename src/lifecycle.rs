//! Cache generations.
//!
//! A generation is a named cache epoch. Exactly one is current; activating a
//! new one makes every other generation eligible for eviction. The client tier
//! keys whole cache stores by generation name (see
//! [`ClientExecutor::activate`](crate::client::ClientExecutor::activate)); the
//! edge tier stamps each response-cache entry with the current generation id.

use std::sync::RwLock;

use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{ResponseStore, rw_read, rw_write};

const SOURCE: &str = "lifecycle";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheGeneration {
    /// Monotonically increasing within the process.
    pub id: u64,
    pub name: String,
}

/// Current edge generation.
pub struct Generations {
    current: RwLock<CacheGeneration>,
}

impl Generations {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(CacheGeneration {
                id: 1,
                name: name.into(),
            }),
        }
    }

    pub fn current(&self) -> CacheGeneration {
        rw_read(&self.current, SOURCE, "current").clone()
    }

    pub fn current_id(&self) -> u64 {
        rw_read(&self.current, SOURCE, "current_id").id
    }

    /// Activate a new generation and evict every entry stamped with another.
    ///
    /// Lookups already ignore entries from older generations once the id has
    /// moved, so an eviction failure only delays reclaiming memory.
    pub async fn rotate(
        &self,
        name: impl Into<String>,
        store: &dyn ResponseStore,
    ) -> CacheGeneration {
        let next = {
            let mut current = rw_write(&self.current, SOURCE, "rotate");
            *current = CacheGeneration {
                id: current.id + 1,
                name: name.into(),
            };
            current.clone()
        };

        match store.evict_except(next.id).await {
            Ok(evicted) => info!(
                generation = %next.name,
                generation_id = next.id,
                evicted,
                "Activated cache generation"
            ),
            Err(err) => warn!(
                generation = %next.name,
                generation_id = next.id,
                error = %err,
                "Activated cache generation; eviction of stale entries failed"
            ),
        }

        next
    }
}
