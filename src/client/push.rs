//! Push notifications.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::{Clients, PlatformError};

pub const ACTION_VIEW: &str = "view";
pub const ACTION_DISMISS: &str = "dismiss";

#[derive(Debug, Error)]
pub enum PushError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Presentation defaults applied when a payload leaves a field out.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushDefaults {
    pub title: String,
    pub body: String,
    pub target_url: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub renotify: bool,
    pub require_interaction: bool,
    pub view_title: String,
    pub view_icon: String,
    pub dismiss_title: String,
    pub dismiss_icon: String,
}

impl Default for PushDefaults {
    fn default() -> Self {
        Self {
            title: "CotAi Edge".to_string(),
            body: "New notification available".to_string(),
            target_url: "/dashboard".to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/badge-72x72.png".to_string(),
            tag: "cotai-notification".to_string(),
            renotify: true,
            require_interaction: false,
            view_title: "View details".to_string(),
            view_icon: "/icons/action-view.png".to_string(),
            dismiss_title: "Dismiss".to_string(),
            dismiss_icon: "/icons/action-dismiss.png".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub target_url: String,
    pub correlation_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub actions: Vec<NotificationAction>,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub renotify: bool,
    pub require_interaction: bool,
}

/// Where notifications are displayed.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn show(&self, notification: &Notification) -> Result<(), PlatformError>;

    async fn close(&self, notification: &Notification) -> Result<(), PlatformError>;
}

/// What a notification click led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Focused { client_id: String },
    Opened { url: String },
    Dismissed,
}

pub struct PushGateway {
    defaults: PushDefaults,
    sink: Arc<dyn NotificationSink>,
    clients: Arc<dyn Clients>,
}

impl PushGateway {
    pub fn new(
        defaults: PushDefaults,
        sink: Arc<dyn NotificationSink>,
        clients: Arc<dyn Clients>,
    ) -> Self {
        Self {
            defaults,
            sink,
            clients,
        }
    }

    /// Build a notification from a push payload. Never fails on bad input.
    pub fn build(&self, payload: Option<&[u8]>) -> Notification {
        let fields = payload.and_then(|bytes| match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(error = %err, "Push payload is not JSON; using defaults");
                None
            }
        });
        let field = |names: &[&str]| fields.as_ref().and_then(|value| string_field(value, names));

        let defaults = &self.defaults;
        Notification {
            title: field(&["title"]).unwrap_or_else(|| defaults.title.clone()),
            body: field(&["body"]).unwrap_or_else(|| defaults.body.clone()),
            target_url: field(&["url"]).unwrap_or_else(|| defaults.target_url.clone()),
            correlation_id: field(&["correlationId", "quotationId"]),
            timestamp: OffsetDateTime::now_utc(),
            actions: vec![
                NotificationAction {
                    action: ACTION_VIEW.to_string(),
                    title: defaults.view_title.clone(),
                    icon: defaults.view_icon.clone(),
                },
                NotificationAction {
                    action: ACTION_DISMISS.to_string(),
                    title: defaults.dismiss_title.clone(),
                    icon: defaults.dismiss_icon.clone(),
                },
            ],
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            tag: defaults.tag.clone(),
            renotify: defaults.renotify,
            require_interaction: defaults.require_interaction,
        }
    }

    /// Handle a push event: build the notification and show it.
    pub async fn on_push(&self, payload: Option<&[u8]>) -> Result<Notification, PushError> {
        let notification = self.build(payload);
        info!(
            title = %notification.title,
            correlation_id = notification.correlation_id.as_deref(),
            "Showing push notification"
        );
        self.sink.show(&notification).await?;
        Ok(notification)
    }

    /// Handle a click on `notification`, optionally on one of its actions.
    pub async fn on_click(
        &self,
        notification: &Notification,
        action: Option<&str>,
    ) -> Result<ClickOutcome, PushError> {
        if let Err(err) = self.sink.close(notification).await {
            warn!(error = %err, "Failed to close notification");
        }

        let url = notification.target_url.as_str();
        match action {
            Some(ACTION_DISMISS) => Ok(ClickOutcome::Dismissed),
            Some(ACTION_VIEW) => self.open(url).await,
            _ => {
                let windows = self.clients.match_all().await?;
                if let Some(window) = windows.into_iter().find(|window| window.url.contains(url)) {
                    self.clients.focus(&window.id).await?;
                    debug!(client_id = %window.id, "Focused existing window");
                    return Ok(ClickOutcome::Focused {
                        client_id: window.id,
                    });
                }
                self.open(url).await
            }
        }
    }

    async fn open(&self, url: &str) -> Result<ClickOutcome, PushError> {
        self.clients.open_window(url).await?;
        Ok(ClickOutcome::Opened {
            url: url.to_string(),
        })
    }
}

/// First non-empty string (or number) among `names`.
fn string_field(value: &Value, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match value.get(name)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}
