//! A client shell for headless hosts.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::worker::{ClientShell, Notification, ShellCapabilities, ShellError, WindowClient};

/// Logs notifications instead of drawing them and keeps a list of windows
/// the worker has opened. Opened windows count as controlled.
#[derive(Default)]
pub struct TracingShell {
    windows: Mutex<Vec<WindowClient>>,
}

impl TracingShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn windows(&self) -> Vec<WindowClient> {
        self.windows.lock().await.clone()
    }
}

#[async_trait]
impl ClientShell for TracingShell {
    fn capabilities(&self) -> ShellCapabilities {
        ShellCapabilities {
            focus: true,
            open_window: true,
        }
    }

    async fn show_notification(&self, notification: &Notification) -> Result<(), ShellError> {
        info!(
            title = %notification.title,
            body = %notification.body,
            tag = %notification.tag,
            actions = notification.actions.len(),
            "notification"
        );
        Ok(())
    }

    async fn close_notification(&self, notification: &Notification) -> Result<(), ShellError> {
        info!(tag = %notification.tag, "notification closed");
        Ok(())
    }

    async fn window_clients(&self, include_uncontrolled: bool) -> Result<Vec<WindowClient>, ShellError> {
        Ok(self
            .windows
            .lock()
            .await
            .iter()
            .filter(|w| include_uncontrolled || w.controlled)
            .cloned()
            .collect())
    }

    async fn focus(&self, client_id: &str) -> Result<(), ShellError> {
        let windows = self.windows.lock().await;
        let window = windows
            .iter()
            .find(|w| w.id == client_id)
            .ok_or_else(|| ShellError::UnknownClient(client_id.to_owned()))?;
        info!(client = %window.id, url = %window.url, "window focused");
        Ok(())
    }

    async fn open_window(&self, url: &str) -> Result<(), ShellError> {
        let mut windows = self.windows.lock().await;
        let id = format!("window-{}", windows.len() + 1);
        info!(client = %id, url, "window opened");
        windows.push(WindowClient {
            id,
            url: url.to_owned(),
            controlled: true,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opened_windows_can_be_focused() {
        let shell = TracingShell::new();
        shell.open_window("/members").await.unwrap();
        let windows = shell.window_clients(false).await.unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].url, "/members");
        shell.focus(&windows[0].id).await.unwrap();
        assert!(matches!(
            shell.focus("window-9").await,
            Err(ShellError::UnknownClient(_))
        ));
    }
}
