//! Client-side cache storage, partitioned by generation name.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::cache::{StoreError, rw_read, rw_write};

use super::network::ClientResponse;

const STORE: &str = "client";

/// Named cache stores, one per generation.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Names of every generation that currently has a store.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Create the store for `generation` if it does not exist yet.
    async fn open(&self, generation: &str) -> Result<(), StoreError>;

    /// Remove a whole generation. Returns whether it existed.
    async fn delete(&self, generation: &str) -> Result<bool, StoreError>;

    async fn match_url(
        &self,
        generation: &str,
        url: &str,
    ) -> Result<Option<ClientResponse>, StoreError>;

    async fn put(
        &self,
        generation: &str,
        url: &str,
        response: ClientResponse,
    ) -> Result<(), StoreError>;

    /// Write every entry or none of them.
    async fn put_all(
        &self,
        generation: &str,
        entries: Vec<(String, ClientResponse)>,
    ) -> Result<(), StoreError>;
}

type Generation = HashMap<String, ClientResponse>;

/// In-memory [`CacheStorage`].
#[derive(Default)]
pub struct MemoryCacheStorage {
    generations: RwLock<BTreeMap<String, Generation>>,
    unavailable: AtomicBool,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Number of entries held under `generation`.
    pub fn entry_count(&self, generation: &str) -> usize {
        rw_read(&self.generations, STORE, "entry_count")
            .get(generation)
            .map_or(0, HashMap::len)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::unavailable(STORE, "storage switched off"));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(rw_read(&self.generations, STORE, "keys")
            .keys()
            .cloned()
            .collect())
    }

    async fn open(&self, generation: &str) -> Result<(), StoreError> {
        self.check()?;
        rw_write(&self.generations, STORE, "open")
            .entry(generation.to_string())
            .or_default();
        Ok(())
    }

    async fn delete(&self, generation: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(rw_write(&self.generations, STORE, "delete")
            .remove(generation)
            .is_some())
    }

    async fn match_url(
        &self,
        generation: &str,
        url: &str,
    ) -> Result<Option<ClientResponse>, StoreError> {
        self.check()?;
        Ok(rw_read(&self.generations, STORE, "match")
            .get(generation)
            .and_then(|entries| entries.get(url))
            .cloned())
    }

    async fn put(
        &self,
        generation: &str,
        url: &str,
        response: ClientResponse,
    ) -> Result<(), StoreError> {
        self.check()?;
        rw_write(&self.generations, STORE, "put")
            .entry(generation.to_string())
            .or_default()
            .insert(url.to_string(), response);
        Ok(())
    }

    async fn put_all(
        &self,
        generation: &str,
        entries: Vec<(String, ClientResponse)>,
    ) -> Result<(), StoreError> {
        self.check()?;
        rw_write(&self.generations, STORE, "put_all")
            .entry(generation.to_string())
            .or_default()
            .extend(entries);
        Ok(())
    }
}
