//! The offline response cache worker.
//!
//! [`CacheWorker`] reacts to the five lifecycle and network events a host
//! delivers to it:
//!
//! | Event                                                  | Effect                                              |
//! |--------------------------------------------------------|-----------------------------------------------------|
//! | [`on_install`](CacheWorker::on_install)                | precache the manifest into the static generation    |
//! | [`on_activate`](CacheWorker::on_activate)              | purge every generation that is not current          |
//! | [`on_fetch`](CacheWorker::on_fetch)                    | route through bypass, network-first or cache-first  |
//! | [`on_push`](CacheWorker::on_push)                      | show a notification from a push payload             |
//! | [`on_notification_click`](CacheWorker::on_notification_click) | focus or open the notification's target     |
//!
//! The worker owns no state of its own beyond its configuration; everything
//! it remembers lives in the [`CacheStorage`] it was built with.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::http::{Request, Response, StatusCode};
use crate::storage::{CacheStorage, RequestKey, StorageError};
use crate::upstream::{FetchError, Upstream};

pub mod classify;
pub mod notify;
mod policy;

pub use classify::{RequestClass, classify};
pub use notify::{
    ClickOutcome, ClientShell, Notification, NotificationAction, PushPayload, ShellCapabilities,
    ShellError, WindowClient,
};

/// Header carrying the storage time of an API entry, in ms since the epoch.
pub const CACHED_AT_HEADER: &str = "x-sw-cached-at";

/// Body of the response synthesized when an API request has neither network
/// nor a fresh cached copy.
pub const OFFLINE_API_BODY: &str = r#"{"error": "Network error. No cached data available."}"#;

pub const DEFAULT_TTL_MS: u64 = 300_000;
pub const DEFAULT_MAX_API_ENTRIES: usize = 50;

/// Everything the worker needs to know, fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name of the current static-asset generation.
    pub static_cache: String,
    /// Name of the current API-response generation.
    pub api_cache: String,
    /// Paths fetched and stored during install, all or nothing.
    pub precache: Vec<String>,
    /// Served from the static generation when a static request has no network.
    pub offline_page: String,
    pub api_prefix: String,
    /// Path fragments that are never cached, whatever the method.
    pub never_cache: Vec<String>,
    pub ttl_ms: u64,
    pub max_api_entries: usize,
    /// Activate as soon as install completes instead of waiting for the
    /// active version to retire.
    pub skip_waiting: bool,
    pub notifications: NotificationDefaults,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            static_cache: "static-v2".to_owned(),
            api_cache: "api-v2".to_owned(),
            precache: vec![
                "/".to_owned(),
                "/index.html".to_owned(),
                "/offline.html".to_owned(),
            ],
            offline_page: "/offline.html".to_owned(),
            api_prefix: "/api/".to_owned(),
            never_cache: vec!["/auth/".to_owned(), "/payments/".to_owned()],
            ttl_ms: DEFAULT_TTL_MS,
            max_api_entries: DEFAULT_MAX_API_ENTRIES,
            skip_waiting: true,
            notifications: NotificationDefaults::default(),
        }
    }
}

impl WorkerConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Returns `true` if `name` is one of the two current generations.
    pub fn is_current_generation(&self, name: &str) -> bool {
        name == self.static_cache || name == self.api_cache
    }
}

/// Values used when a push payload leaves a field out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub icon: Option<String>,
    pub badge: Option<String>,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "Savings Group".to_owned(),
            body: "You have a new notification".to_owned(),
            tag: "savings-group".to_owned(),
            icon: Some("/icons/icon-192.png".to_owned()),
            badge: Some("/icons/badge-72.png".to_owned()),
        }
    }
}

/// Errors surfaced by worker events.
///
/// Only install errors stop a worker from going live; fetches never produce a
/// `WorkerError` (their failures are HTTP-shaped or a [`FetchError`]).
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("precache of {uri} failed: {source}")]
    Precache {
        uri: String,
        #[source]
        source: FetchError,
    },

    #[error("precache of {uri} returned {status}")]
    PrecacheStatus { uri: String, status: StatusCode },

    #[error("cache storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid push payload: {0}")]
    PushPayload(#[from] serde_json::Error),

    #[error("client shell error: {0}")]
    Shell(#[from] ShellError),
}

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub precached: usize,
    /// Asks the host to activate without waiting for older workers to retire.
    pub skip_waiting: bool,
}

/// Result of activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateOutcome {
    /// Generations removed because they were not current.
    pub purged: Vec<String>,
    /// Asks the host to route every client through this worker immediately.
    pub claim: bool,
}

/// The offline response cache manager.
pub struct CacheWorker {
    config: WorkerConfig,
    storage: Arc<dyn CacheStorage>,
    upstream: Arc<dyn Upstream>,
    shell: Arc<dyn ClientShell>,
    clock: Arc<dyn Clock>,
}

impl CacheWorker {
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        upstream: Arc<dyn Upstream>,
        shell: Arc<dyn ClientShell>,
    ) -> Self {
        Self {
            config,
            storage,
            upstream,
            shell,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the wall clock used for `x-sw-cached-at` stamps and TTL checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Populates the static generation with every precache path.
    ///
    /// All paths are fetched first; nothing is stored unless every fetch
    /// succeeded with a `2xx`. Any failure fails the install.
    ///
    /// # Errors
    ///
    /// - [`WorkerError::Precache`]: a manifest path could not be fetched.
    /// - [`WorkerError::PrecacheStatus`]: a manifest path answered non-`2xx`.
    /// - [`WorkerError::Storage`]: the static generation rejected an entry.
    pub async fn on_install(&self) -> Result<InstallOutcome, WorkerError> {
        let generation = self.storage.open(&self.config.static_cache).await?;

        let fetches = self.config.precache.iter().map(|uri| async move {
            let request = Request::get(uri);
            let response =
                self.upstream
                    .fetch(&request)
                    .await
                    .map_err(|source| WorkerError::Precache {
                        uri: uri.clone(),
                        source,
                    })?;
            if !response.status().is_success() {
                return Err(WorkerError::PrecacheStatus {
                    uri: uri.clone(),
                    status: response.status(),
                });
            }
            Ok((RequestKey::of(&request), response))
        });

        let fetched = match try_join_all(fetches).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(generation = %self.config.static_cache, error = %e, "install failed");
                return Err(e);
            }
        };

        let precached = fetched.len();
        for (key, response) in fetched {
            generation.put(key, response).await?;
        }

        info!(generation = %self.config.static_cache, precached, "installed");
        Ok(InstallOutcome {
            precached,
            skip_waiting: self.config.skip_waiting,
        })
    }

    /// Deletes every generation whose name is not one of the two current names.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Storage`] if the generations cannot be listed or
    /// removed.
    pub async fn on_activate(&self) -> Result<ActivateOutcome, WorkerError> {
        let mut purged = Vec::new();
        for name in self.storage.names().await? {
            if self.config.is_current_generation(&name) {
                continue;
            }
            if self.storage.delete(&name).await? {
                debug!(generation = %name, "purged stale generation");
                purged.push(name);
            }
        }

        info!(purged = purged.len(), "activated");
        Ok(ActivateOutcome {
            purged,
            claim: true,
        })
    }

    /// Answers an intercepted request.
    ///
    /// Network-first requests always produce a response. Bypassed requests
    /// propagate the transport failure unchanged, and cache-first requests do
    /// so only when the offline page is missing as well.
    pub async fn on_fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let class = classify(&self.config, request);
        debug!(
            method = %request.method(),
            uri = %request.uri(),
            policy = class.as_str(),
            "intercepted"
        );

        match class {
            RequestClass::Bypass => self.upstream.fetch(request).await,
            RequestClass::NetworkFirst => Ok(self.network_first(request).await),
            RequestClass::CacheFirst => self.cache_first(request).await,
        }
    }

    /// Shows a notification built from `payload`.
    ///
    /// Returns `Ok(None)` without touching the shell when there is no payload.
    ///
    /// # Errors
    ///
    /// - [`WorkerError::PushPayload`]: the payload is not a JSON push object.
    /// - [`WorkerError::Shell`]: the shell could not display it.
    pub async fn on_push(&self, payload: Option<&[u8]>) -> Result<Option<Notification>, WorkerError> {
        let Some(bytes) = payload.filter(|b| !b.is_empty()) else {
            debug!("push without payload ignored");
            return Ok(None);
        };

        let payload: PushPayload = serde_json::from_slice(bytes)?;
        let notification = payload.into_notification(&self.config.notifications);
        self.shell.show_notification(&notification).await?;
        info!(tag = %notification.tag, "notification shown");
        Ok(Some(notification))
    }

    /// Closes `notification` and brings its target URL to the front.
    ///
    /// An open window whose URL equals the target exactly is focused; otherwise
    /// a new window is opened. Without either capability nothing happens.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Shell`] if the shell fails an operation it claims
    /// to support.
    pub async fn on_notification_click(
        &self,
        notification: &Notification,
    ) -> Result<ClickOutcome, WorkerError> {
        self.shell.close_notification(notification).await?;

        let target = notification.target_url();
        let capabilities = self.shell.capabilities();

        if capabilities.focus {
            let clients = self.shell.window_clients(true).await?;
            if let Some(client) = clients.iter().find(|c| c.url == target) {
                self.shell.focus(&client.id).await?;
                return Ok(ClickOutcome::Focused {
                    client: client.id.clone(),
                });
            }
        }

        if capabilities.open_window {
            self.shell.open_window(target).await?;
            return Ok(ClickOutcome::Opened {
                url: target.to_owned(),
            });
        }

        debug!(target, "notification click ignored: shell cannot focus or open");
        Ok(ClickOutcome::Ignored)
    }
}

/// The `503` an API request gets when both network and cache come up empty.
pub fn offline_api_response() -> Response {
    Response::json(StatusCode::SERVICE_UNAVAILABLE, OFFLINE_API_BODY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use crate::storage::MemoryStorage;
    use crate::testing::{RecordingShell, ScriptedUpstream};

    fn app_shell() -> Arc<ScriptedUpstream> {
        let upstream = Arc::new(ScriptedUpstream::new());
        for uri in ["/", "/index.html", "/offline.html"] {
            upstream.route(Method::Get, uri, Response::new(StatusCode::OK).body(format!("page {uri}")));
        }
        upstream
    }

    fn worker(storage: &Arc<MemoryStorage>, upstream: &Arc<ScriptedUpstream>) -> CacheWorker {
        CacheWorker::new(
            WorkerConfig::default(),
            storage.clone(),
            upstream.clone(),
            Arc::new(RecordingShell::new()),
        )
    }

    #[tokio::test]
    async fn install_precaches_every_manifest_path() {
        let storage = Arc::new(MemoryStorage::new());
        let outcome = worker(&storage, &app_shell()).on_install().await.unwrap();
        assert_eq!(
            outcome,
            InstallOutcome {
                precached: 3,
                skip_waiting: true
            }
        );

        let generation = storage.open("static-v2").await.unwrap();
        let keys: Vec<String> = generation
            .keys()
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(keys, ["GET /", "GET /index.html", "GET /offline.html"]);
    }

    #[tokio::test]
    async fn install_stores_nothing_when_one_path_fails() {
        let storage = Arc::new(MemoryStorage::new());
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.route(Method::Get, "/", Response::new(StatusCode::OK));
        upstream.route(Method::Get, "/index.html", Response::new(StatusCode::OK));

        let err = worker(&storage, &upstream).on_install().await.unwrap_err();
        assert!(matches!(
            err,
            WorkerError::PrecacheStatus { ref uri, status } if uri == "/offline.html" && status == StatusCode::NOT_FOUND
        ));
        let generation = storage.open("static-v2").await.unwrap();
        assert_eq!(generation.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn install_fails_offline() {
        let storage = Arc::new(MemoryStorage::new());
        let upstream = app_shell();
        upstream.set_online(false);
        let err = worker(&storage, &upstream).on_install().await.unwrap_err();
        assert!(matches!(err, WorkerError::Precache { .. }));
    }

    #[tokio::test]
    async fn install_surfaces_quota_errors() {
        let storage = Arc::new(MemoryStorage::with_quota(2));
        let err = worker(&storage, &app_shell()).on_install().await.unwrap_err();
        assert!(matches!(err, WorkerError::Storage(StorageError::QuotaExceeded { .. })));
    }

    #[tokio::test]
    async fn activate_purges_everything_but_current_generations() {
        let storage = Arc::new(MemoryStorage::new());
        for name in ["static-v1", "api-v1", "static-v2", "api-v2", "thumbnails"] {
            storage.open(name).await.unwrap();
        }

        let outcome = worker(&storage, &app_shell()).on_activate().await.unwrap();
        assert!(outcome.claim);
        assert_eq!(outcome.purged, ["static-v1", "api-v1", "thumbnails"]);

        let mut remaining = storage.names().await.unwrap();
        remaining.sort();
        assert_eq!(remaining, ["api-v2", "static-v2"]);
    }

    #[test]
    fn offline_api_response_is_json_503() {
        let resp = offline_api_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.headers().get("content-type"), Some("application/json"));
        assert_eq!(&resp.payload()[..], OFFLINE_API_BODY.as_bytes());
    }
}
