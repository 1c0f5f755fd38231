//! Client executor: install, activate and per-request interception.

use std::sync::{Arc, Mutex};

use axum::http::{Method, StatusCode};
use futures::future::try_join_all;
use metrics::counter;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{DeferredTasks, StoreError, mutex_lock};
use crate::routing::ClientStrategy;

use super::network::{ClientRequest, ClientResponse, Network, NetworkError};
use super::storage::CacheStorage;
use super::{ClientConfig, Clients};

const SOURCE: &str = "client.executor";
const RESOURCE_UNAVAILABLE: &str = "Resource not available offline";
const CONTENT_UNAVAILABLE: &str = "Content not available offline";

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("invalid manifest entry `{path}`: {source}")]
    InvalidEntry {
        path: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to fetch `{url}`: {source}")]
    Fetch {
        url: String,
        #[source]
        source: NetworkError,
    },
    #[error("`{url}` answered {status}")]
    Status { url: String, status: StatusCode },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where this executor is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    /// Installed and asked to skip waiting.
    Installed,
    /// Installed without a complete manifest; waits for old clients to go away.
    Waiting,
    Activated,
}

/// Outcome of one interception.
#[derive(Debug)]
pub enum Interception {
    /// Not ours; the runtime performs the request untouched.
    Passthrough,
    Respond(ClientResponse),
}

impl Interception {
    pub fn response(self) -> Option<ClientResponse> {
        match self {
            Self::Passthrough => None,
            Self::Respond(response) => Some(response),
        }
    }
}

#[derive(Clone)]
pub struct ClientCapabilities {
    pub storage: Arc<dyn CacheStorage>,
    pub network: Arc<dyn Network>,
    pub clients: Arc<dyn Clients>,
}

pub struct ClientExecutor {
    config: ClientConfig,
    caps: ClientCapabilities,
    state: Mutex<WorkerState>,
    deferred: DeferredTasks,
}

impl ClientExecutor {
    pub fn new(config: ClientConfig, caps: ClientCapabilities) -> Self {
        Self {
            config,
            caps,
            state: Mutex::new(WorkerState::Parsed),
            deferred: DeferredTasks::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        *mutex_lock(&self.state, SOURCE, "state")
    }

    #[cfg(test)]
    pub(crate) fn deferred(&self) -> &DeferredTasks {
        &self.deferred
    }

    /// Pre-populate the current generation with the manifest.
    ///
    /// Every entry is fetched before anything is written; a single failure
    /// leaves the generation untouched and the executor in
    /// [`WorkerState::Waiting`].
    #[instrument(skip_all, fields(generation = %self.config.generation))]
    pub async fn install(&self) -> Result<usize, InstallError> {
        match self.precache().await {
            Ok(count) => {
                self.skip_waiting();
                info!(entries = count, "Installed cache generation");
                Ok(count)
            }
            Err(err) => {
                error!(error = %err, "Install failed; generation not populated");
                *mutex_lock(&self.state, SOURCE, "install") = WorkerState::Waiting;
                Err(err)
            }
        }
    }

    async fn precache(&self) -> Result<usize, InstallError> {
        let generation = self.config.generation.as_str();
        self.caps.storage.open(generation).await?;

        let requests = self
            .config
            .manifest
            .iter()
            .map(|path| {
                self.config
                    .resolve(path)
                    .map(ClientRequest::get)
                    .map_err(|source| InstallError::InvalidEntry {
                        path: path.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let fetches = requests.iter().map(|request| async move {
            let url = request.cache_key();
            let response = self
                .caps
                .network
                .fetch(request)
                .await
                .map_err(|source| InstallError::Fetch {
                    url: url.clone(),
                    source,
                })?;
            if !response.is_success() {
                return Err(InstallError::Status {
                    url,
                    status: response.status,
                });
            }
            Ok((url, response))
        });
        let entries = try_join_all(fetches).await?;
        let count = entries.len();

        self.caps.storage.put_all(generation, entries).await?;
        Ok(count)
    }

    fn skip_waiting(&self) {
        *mutex_lock(&self.state, SOURCE, "skip_waiting") = WorkerState::Installed;
    }

    /// Delete every generation except the current one and claim open clients.
    /// Returns the names of the deleted generations.
    #[instrument(skip_all, fields(generation = %self.config.generation))]
    pub async fn activate(&self) -> Result<Vec<String>, StoreError> {
        let mut deleted = Vec::new();
        for name in self.caps.storage.keys().await? {
            if name == self.config.generation {
                continue;
            }
            if self.caps.storage.delete(&name).await? {
                info!(stale = %name, "Removed stale cache generation");
                deleted.push(name);
            }
        }

        if let Err(err) = self.caps.clients.claim().await {
            warn!(error = %err, "Failed to claim open clients");
        }

        *mutex_lock(&self.state, SOURCE, "activate") = WorkerState::Activated;
        Ok(deleted)
    }

    #[instrument(skip_all, fields(method = %request.method, path = %request.url.path()))]
    pub async fn intercept(&self, request: ClientRequest) -> Interception {
        if request.method != Method::GET || request.url.origin() != self.config.origin.origin() {
            return Interception::Passthrough;
        }

        let strategy = self.config.rules.select(request.url.path());
        debug!(strategy = %strategy, "intercepting");

        let response = match strategy {
            ClientStrategy::CacheFirst => self.cache_first(request).await,
            ClientStrategy::NetworkFirst => self.network_first(request).await,
            ClientStrategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
        };
        Interception::Respond(response)
    }

    async fn cache_first(&self, request: ClientRequest) -> ClientResponse {
        let key = request.cache_key();
        if let Some(hit) = self.cached(&key).await {
            debug!(cache = "client", outcome = "hit", "serving cached response");
            return hit;
        }

        match self.caps.network.fetch(&request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(&key, response.clone()).await;
                }
                response
            }
            Err(err) => {
                warn!(error = %err, "cache-first fetch failed");
                record_fallback(ClientStrategy::CacheFirst, "unavailable");
                unavailable(RESOURCE_UNAVAILABLE)
            }
        }
    }

    async fn network_first(&self, request: ClientRequest) -> ClientResponse {
        let key = request.cache_key();
        match self.caps.network.fetch(&request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(&key, response.clone()).await;
                }
                response
            }
            Err(err) => {
                debug!(error = %err, "network unavailable, trying cache");
                if let Some(hit) = self.cached(&key).await {
                    record_fallback(ClientStrategy::NetworkFirst, "cache");
                    return hit;
                }
                self.offline_fallback(ClientStrategy::NetworkFirst, &request)
                    .await
            }
        }
    }

    async fn stale_while_revalidate(&self, request: ClientRequest) -> ClientResponse {
        let key = request.cache_key();
        let cached = self.cached(&key).await;

        let (tx, rx) = oneshot::channel();
        let network = self.caps.network.clone();
        let storage = self.caps.storage.clone();
        let generation = self.config.generation.clone();
        let revalidate = request.clone();
        self.deferred.spawn("client.revalidate", async move {
            match network.fetch(&revalidate).await {
                Ok(response) => {
                    let stored = if response.is_success() {
                        storage.put(&generation, &key, response.clone()).await
                    } else {
                        Ok(())
                    };
                    let _ = tx.send(Some(response));
                    stored
                }
                Err(err) => {
                    debug!(error = %err, "background revalidation failed");
                    let _ = tx.send(None);
                    Ok(())
                }
            }
        });

        if let Some(hit) = cached {
            debug!(cache = "client", outcome = "hit", "serving stale response");
            return hit;
        }

        match rx.await {
            Ok(Some(response)) => response,
            _ => {
                self.offline_fallback(ClientStrategy::StaleWhileRevalidate, &request)
                    .await
            }
        }
    }

    async fn offline_fallback(
        &self,
        strategy: ClientStrategy,
        request: &ClientRequest,
    ) -> ClientResponse {
        if request.accepts_html() {
            if let Some(page) = self.offline_page().await {
                record_fallback(strategy, "offline");
                return page;
            }
        }
        record_fallback(strategy, "unavailable");
        unavailable(CONTENT_UNAVAILABLE)
    }

    async fn offline_page(&self) -> Option<ClientResponse> {
        let url = self.config.resolve(&self.config.offline_path).ok()?;
        self.cached(url.as_str()).await
    }

    async fn cached(&self, key: &str) -> Option<ClientResponse> {
        match self
            .caps
            .storage
            .match_url(&self.config.generation, key)
            .await
        {
            Ok(hit) => hit,
            Err(err) => {
                counter!("tiercache_store_error_total", "store" => "client").increment(1);
                warn!(error = %err, "client cache read failed, treating as miss");
                None
            }
        }
    }

    async fn store(&self, key: &str, response: ClientResponse) {
        if let Err(err) = self
            .caps
            .storage
            .put(&self.config.generation, key, response)
            .await
        {
            counter!("tiercache_store_error_total", "store" => "client").increment(1);
            warn!(error = %err, "client cache write failed");
        }
    }
}

fn unavailable(body: &'static str) -> ClientResponse {
    ClientResponse::new(StatusCode::SERVICE_UNAVAILABLE, body)
}

fn record_fallback(strategy: ClientStrategy, fallback: &'static str) {
    counter!(
        "tiercache_client_fallback_total",
        "strategy" => strategy.as_str(),
        "fallback" => fallback
    )
    .increment(1);
}
