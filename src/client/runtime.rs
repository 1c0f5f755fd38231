//! Client tier assembly from loaded settings.

use std::sync::Arc;

use serde_json::Value;

use crate::config::Settings;
use crate::infra::error::InfraError;

use super::executor::{ClientCapabilities, ClientExecutor};
use super::network::{Network, ReqwestNetwork};
use super::push::{NotificationSink, PushGateway};
use super::storage::CacheStorage;
use super::sync::{SyncCoordinator, SyncError, SyncHandler, SyncOutcome, SyncTask};
use super::{ClientConfig, Clients};

/// Bindings supplied by the host runtime.
#[derive(Clone)]
pub struct ClientPlatform {
    pub storage: Arc<dyn CacheStorage>,
    pub clients: Arc<dyn Clients>,
    pub sink: Arc<dyn NotificationSink>,
    /// Replays work queued under the configured sync tag.
    pub sync_handler: Arc<dyn SyncHandler>,
}

/// Executor, push gateway and sync coordinator wired from one [`Settings`].
pub struct ClientRuntime {
    pub executor: ClientExecutor,
    pub push: PushGateway,
    pub sync: SyncCoordinator,
    sync_tag: String,
}

impl ClientRuntime {
    /// Build with a `reqwest` network bounded by `client.network_timeout`.
    pub fn from_settings(settings: &Settings, platform: ClientPlatform) -> Result<Self, InfraError> {
        let network = ReqwestNetwork::new(settings.client.network_timeout)?;
        Ok(Self::with_network(settings, platform, Arc::new(network)))
    }

    pub fn with_network(
        settings: &Settings,
        platform: ClientPlatform,
        network: Arc<dyn Network>,
    ) -> Self {
        let executor = ClientExecutor::new(
            ClientConfig::from(&settings.client),
            ClientCapabilities {
                storage: platform.storage,
                network,
                clients: platform.clients.clone(),
            },
        );
        let push = PushGateway::new(settings.push.clone(), platform.sink, platform.clients);

        let sync = SyncCoordinator::new();
        sync.register(settings.sync.tag.clone(), platform.sync_handler);

        Self {
            executor,
            push,
            sync,
            sync_tag: settings.sync.tag.clone(),
        }
    }

    pub fn sync_tag(&self) -> &str {
        &self.sync_tag
    }

    /// Queue work for the next background sync.
    pub fn queue_sync(&self, payload: Value) -> Result<SyncTask, SyncError> {
        self.sync.enqueue(&self.sync_tag, payload)
    }

    /// Handle a sync event fired by the runtime for the configured tag.
    pub async fn on_sync(&self) -> Result<SyncOutcome, SyncError> {
        self.sync.on_sync(&self.sync_tag).await
    }
}
