//! Client tier.
//!
//! The interception layer that runs inside the client runtime: it answers
//! same-origin GETs from a generation-scoped cache or the network, keeps an
//! offline page around, and handles push and background-sync events. Platform
//! facilities (open windows, notifications, the network itself) are reached
//! through traits so a host can plug in its own bindings.

mod executor;
mod network;
mod push;
mod runtime;
mod storage;
mod sync;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::routing::ClientRules;

pub use executor::{ClientCapabilities, ClientExecutor, InstallError, Interception, WorkerState};
pub use network::{ClientRequest, ClientResponse, Network, NetworkError, ReqwestNetwork};
pub use push::{
    ClickOutcome, Notification, NotificationAction, NotificationSink, PushDefaults, PushError,
    PushGateway,
};
pub use runtime::{ClientPlatform, ClientRuntime};
pub use storage::{CacheStorage, MemoryCacheStorage};
pub use sync::{SyncCoordinator, SyncError, SyncHandler, SyncOutcome, SyncTask};

/// Failure reported by a platform binding.
#[derive(Debug, Error)]
#[error("{operation} failed: {message}")]
pub struct PlatformError {
    pub operation: &'static str,
    pub message: String,
}

impl PlatformError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// A window controlled by the client runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
    pub id: String,
    pub url: String,
}

/// The set of windows the runtime controls.
#[async_trait]
pub trait Clients: Send + Sync {
    async fn match_all(&self) -> Result<Vec<WindowClient>, PlatformError>;

    async fn focus(&self, id: &str) -> Result<(), PlatformError>;

    async fn open_window(&self, url: &str) -> Result<(), PlatformError>;

    /// Take control of already-open windows without a reload.
    async fn claim(&self) -> Result<(), PlatformError>;
}

/// Client tier configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Only requests to this origin are intercepted.
    pub origin: Url,
    /// Name of the current cache generation.
    pub generation: String,
    pub offline_path: String,
    /// Paths fetched and stored at install time.
    pub manifest: Vec<String>,
    pub rules: ClientRules,
}

impl ClientConfig {
    /// Absolute URL of a same-origin path.
    pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
        self.origin.join(path)
    }
}

impl From<&crate::config::ClientSettings> for ClientConfig {
    fn from(settings: &crate::config::ClientSettings) -> Self {
        Self {
            origin: settings.origin.clone(),
            generation: settings.generation.clone(),
            offline_path: settings.offline_path.clone(),
            manifest: settings.manifest.clone(),
            rules: settings.rules.clone(),
        }
    }
}
