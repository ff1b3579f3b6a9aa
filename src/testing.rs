//! In-memory stand-ins for the network and the client shell.
//!
//! Used by this crate's own tests. Embedders who want to drive a
//! [`CacheWorker`](crate::worker::CacheWorker) without a backend enable the
//! `testing` feature.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::http::{Method, Request, Response, StatusCode};
use crate::upstream::{FetchError, Upstream};
use crate::worker::{ClientShell, Notification, ShellCapabilities, ShellError, WindowClient};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An upstream answering from a fixed route table, with an on/off switch
/// standing in for connectivity.
///
/// Unrouted requests get `404 Not Found`. While offline every fetch fails with
/// [`FetchError::Unreachable`].
pub struct ScriptedUpstream {
    routes: Mutex<HashMap<(Method, String), Response>>,
    online: AtomicBool,
    calls: Mutex<Vec<(Method, String)>>,
}

impl Default for ScriptedUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers `method uri` with `response` from now on.
    pub fn route(&self, method: Method, uri: &str, response: Response) {
        lock(&self.routes).insert((method, uri.to_owned()), response);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Every fetch attempted so far, online or not.
    pub fn calls(&self) -> Vec<(Method, String)> {
        lock(&self.calls).clone()
    }

    pub fn calls_to(&self, uri: &str) -> usize {
        lock(&self.calls).iter().filter(|(_, u)| u == uri).count()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let key = (request.method().clone(), request.uri());
        lock(&self.calls).push(key.clone());

        if !self.online.load(Ordering::SeqCst) {
            return Err(FetchError::Unreachable(format!("offline: {} {}", key.0, key.1)));
        }
        Ok(lock(&self.routes)
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Response::new(StatusCode::NOT_FOUND)))
    }
}

/// A shell that records every call made to it.
pub struct RecordingShell {
    capabilities: ShellCapabilities,
    windows: Mutex<Vec<WindowClient>>,
    shown: Mutex<Vec<Notification>>,
    closed: Mutex<Vec<Notification>>,
    focused: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
}

impl Default for RecordingShell {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingShell {
    /// A shell that can both focus and open windows.
    pub fn new() -> Self {
        Self::with_capabilities(ShellCapabilities {
            focus: true,
            open_window: true,
        })
    }

    pub fn with_capabilities(capabilities: ShellCapabilities) -> Self {
        Self {
            capabilities,
            windows: Mutex::new(Vec::new()),
            shown: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            focused: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn add_window(&self, id: &str, url: &str, controlled: bool) {
        lock(&self.windows).push(WindowClient {
            id: id.to_owned(),
            url: url.to_owned(),
            controlled,
        });
    }

    pub fn shown(&self) -> Vec<Notification> {
        lock(&self.shown).clone()
    }

    pub fn closed(&self) -> Vec<Notification> {
        lock(&self.closed).clone()
    }

    pub fn focused(&self) -> Vec<String> {
        lock(&self.focused).clone()
    }

    pub fn opened(&self) -> Vec<String> {
        lock(&self.opened).clone()
    }
}

#[async_trait]
impl ClientShell for RecordingShell {
    fn capabilities(&self) -> ShellCapabilities {
        self.capabilities
    }

    async fn show_notification(&self, notification: &Notification) -> Result<(), ShellError> {
        lock(&self.shown).push(notification.clone());
        Ok(())
    }

    async fn close_notification(&self, notification: &Notification) -> Result<(), ShellError> {
        lock(&self.closed).push(notification.clone());
        Ok(())
    }

    async fn window_clients(&self, include_uncontrolled: bool) -> Result<Vec<WindowClient>, ShellError> {
        Ok(lock(&self.windows)
            .iter()
            .filter(|w| include_uncontrolled || w.controlled)
            .cloned()
            .collect())
    }

    async fn focus(&self, client_id: &str) -> Result<(), ShellError> {
        if !self.capabilities.focus {
            return Err(ShellError::Unsupported("focus"));
        }
        lock(&self.focused).push(client_id.to_owned());
        Ok(())
    }

    async fn open_window(&self, url: &str) -> Result<(), ShellError> {
        if !self.capabilities.open_window {
            return Err(ShellError::Unsupported("open_window"));
        }
        lock(&self.opened).push(url.to_owned());
        Ok(())
    }
}
