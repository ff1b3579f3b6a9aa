//! Host adapter: owns the worker lifecycle and binds workers to the gateway.
//!
//! A [`Registration`] plays the part a browser plays for a service worker: it
//! installs new worker versions, decides when they activate, retires the old
//! version, and routes every fetch to whichever worker is active.
//!
//! ```text
//! installing ──ok──▶ installed ──(skip-waiting | nothing active | release)──▶ activating ──▶ active
//!     │                  │                                                                  │
//!     └──err──▶ redundant ◀──────── superseded by a newer installed worker ◀────────────────┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info, warn};

use crate::http::{Request, Response};
use crate::upstream::{FetchError, Upstream};
use crate::worker::{CacheWorker, ClickOutcome, Notification, WorkerError};

pub mod middleware;
pub mod shell;

pub use middleware::{PushIngressMiddleware, WorkerMiddleware};
pub use shell::TracingShell;

/// Where a worker version is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Installing,
    /// Installed and waiting for the active version to retire.
    Installed,
    Activating,
    Active,
    /// Failed to install, or replaced by a newer version.
    Redundant,
}

/// The latest lifecycle change observed by a [`Registration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Sequence number assigned to the worker at registration, starting at 1.
    pub version: u64,
    pub state: LifecycleState,
}

struct Slot {
    version: u64,
    worker: Arc<CacheWorker>,
}

/// Drives worker versions through their lifecycle and dispatches events to
/// the active one.
pub struct Registration {
    upstream: Arc<dyn Upstream>,
    active: RwLock<Option<Slot>>,
    waiting: Mutex<Option<Slot>>,
    next_version: AtomicU64,
    transitions: watch::Sender<Transition>,
}

impl Registration {
    /// `upstream` serves requests while no worker is active.
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        let (transitions, _) = watch::channel(Transition {
            version: 0,
            state: LifecycleState::Redundant,
        });
        Self {
            upstream,
            active: RwLock::new(None),
            waiting: Mutex::new(None),
            next_version: AtomicU64::new(1),
            transitions,
        }
    }

    /// Observes lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<Transition> {
        self.transitions.subscribe()
    }

    pub async fn active_version(&self) -> Option<u64> {
        self.active.read().await.as_ref().map(|s| s.version)
    }

    pub async fn waiting_version(&self) -> Option<u64> {
        self.waiting.lock().await.as_ref().map(|s| s.version)
    }

    fn transition(&self, version: u64, state: LifecycleState) {
        debug!(version, ?state, "worker lifecycle");
        self.transitions.send_replace(Transition { version, state });
    }

    /// Installs `worker` and, when allowed, activates it.
    ///
    /// Returns the state the new version ended in: [`LifecycleState::Active`]
    /// or [`LifecycleState::Installed`] (waiting).
    ///
    /// # Errors
    ///
    /// Returns the install error. The new version becomes redundant and the
    /// previously active version keeps serving.
    pub async fn register(&self, worker: CacheWorker) -> Result<LifecycleState, WorkerError> {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let worker = Arc::new(worker);

        self.transition(version, LifecycleState::Installing);
        let outcome = match worker.on_install().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(version, error = %e, "install failed, keeping previous worker");
                self.transition(version, LifecycleState::Redundant);
                return Err(e);
            }
        };
        self.transition(version, LifecycleState::Installed);

        let has_active = self.active.read().await.is_some();
        if outcome.skip_waiting || !has_active {
            self.activate(Slot { version, worker }).await;
            return Ok(LifecycleState::Active);
        }

        let superseded = self.waiting.lock().await.replace(Slot { version, worker });
        if let Some(old) = superseded {
            self.transition(old.version, LifecycleState::Redundant);
        }
        info!(version, "installed, waiting for active worker to retire");
        Ok(LifecycleState::Installed)
    }

    /// Signals that the active version no longer controls any client, letting
    /// a waiting version activate. Returns `true` if one did.
    pub async fn release_active(&self) -> bool {
        let waiting = self.waiting.lock().await.take();
        match waiting {
            Some(slot) => {
                self.activate(slot).await;
                true
            }
            None => false,
        }
    }

    async fn activate(&self, slot: Slot) {
        self.transition(slot.version, LifecycleState::Activating);

        // A failed purge does not stop activation.
        match slot.worker.on_activate().await {
            Ok(outcome) => debug!(
                version = slot.version,
                purged = ?outcome.purged,
                claim = outcome.claim,
                "activate complete"
            ),
            Err(e) => warn!(version = slot.version, error = %e, "activate step failed"),
        }

        let version = slot.version;
        let previous = self.active.write().await.replace(slot);
        if let Some(old) = previous {
            self.transition(old.version, LifecycleState::Redundant);
        }
        self.transition(version, LifecycleState::Active);
        info!(version, "worker active");
    }

    async fn active_worker(&self) -> Option<Arc<CacheWorker>> {
        self.active.read().await.as_ref().map(|s| s.worker.clone())
    }

    /// Routes `request` to the active worker, or straight upstream when there is none.
    pub async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        match self.active_worker().await {
            Some(worker) => worker.on_fetch(request).await,
            None => self.upstream.fetch(request).await,
        }
    }

    /// Delivers a push message to the active worker. Without one the message
    /// is dropped.
    pub async fn push(&self, payload: Option<&[u8]>) -> Result<Option<Notification>, WorkerError> {
        match self.active_worker().await {
            Some(worker) => worker.on_push(payload).await,
            None => {
                debug!("push dropped: no active worker");
                Ok(None)
            }
        }
    }

    pub async fn notification_click(
        &self,
        notification: &Notification,
    ) -> Result<ClickOutcome, WorkerError> {
        match self.active_worker().await {
            Some(worker) => worker.on_notification_click(notification).await,
            None => Ok(ClickOutcome::Ignored),
        }
    }
}
