//! Push notifications and the client shell they are shown in.
//!
//! The worker never draws anything itself. It turns a [`PushPayload`] into a
//! [`Notification`] and hands it to a [`ClientShell`], the host's window and
//! notification surface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::NotificationDefaults;

/// The JSON object a push message carries. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub tag: Option<String>,
    pub actions: Option<Vec<NotificationAction>>,
    /// Opaque data handed back on click; `data.url` is the click target.
    pub data: Option<Value>,
}

impl PushPayload {
    /// Fills gaps from `defaults`. `require_interaction` is always `false`.
    pub fn into_notification(self, defaults: &NotificationDefaults) -> Notification {
        Notification {
            title: self.title.unwrap_or_else(|| defaults.title.clone()),
            body: self.body.unwrap_or_else(|| defaults.body.clone()),
            tag: self.tag.unwrap_or_else(|| defaults.tag.clone()),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            actions: self.actions.unwrap_or_default(),
            data: self.data.unwrap_or_else(|| Value::Object(Default::default())),
            require_interaction: false,
        }
    }
}

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// A notification as shown to the user and as delivered back on click.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(default)]
    pub actions: Vec<NotificationAction>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub require_interaction: bool,
}

impl Notification {
    /// `data.url` when it is a non-empty string, `/` otherwise.
    pub fn target_url(&self) -> &str {
        self.data
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .unwrap_or("/")
    }
}

/// An open application window known to the shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowClient {
    pub id: String,
    pub url: String,
    /// Whether the window's requests currently go through the worker.
    pub controlled: bool,
}

/// What the shell is able to do on a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShellCapabilities {
    pub focus: bool,
    pub open_window: bool,
}

/// What a notification click ended up doing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClickOutcome {
    Focused { client: String },
    Opened { url: String },
    Ignored,
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("shell does not support {0}")]
    Unsupported(&'static str),

    #[error("no window client with id {0}")]
    UnknownClient(String),
}

/// The host's notification and window surface.
#[async_trait]
pub trait ClientShell: Send + Sync {
    fn capabilities(&self) -> ShellCapabilities;

    async fn show_notification(&self, notification: &Notification) -> Result<(), ShellError>;

    async fn close_notification(&self, notification: &Notification) -> Result<(), ShellError>;

    /// Lists open windows; uncontrolled ones only when `include_uncontrolled`.
    async fn window_clients(&self, include_uncontrolled: bool) -> Result<Vec<WindowClient>, ShellError>;

    async fn focus(&self, client_id: &str) -> Result<(), ShellError>;

    async fn open_window(&self, url: &str) -> Result<(), ShellError>;
}
