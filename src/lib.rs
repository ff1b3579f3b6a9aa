//! # swgate
//!
//! An offline response cache that sits between a browser portal and its
//! backend API.
//!
//! - API `GET`s are **network-first**: fresh responses are stored with an
//!   `x-sw-cached-at` stamp and replayed for up to five minutes when the
//!   network fails; otherwise the caller gets a JSON `503`.
//! - Static assets are **cache-first**, precached at install, with an offline
//!   page as the last resort.
//! - Writes and anything under `/auth/` or `/payments/` always go to the network.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use swgate::host::{Registration, TracingShell, WorkerMiddleware};
//! use swgate::middleware::{LoggerMiddleware, Pipeline};
//! use swgate::server::Server;
//! use swgate::storage::MemoryStorage;
//! use swgate::upstream::HttpUpstream;
//! use swgate::worker::{CacheWorker, WorkerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let upstream = Arc::new(HttpUpstream::new("http://127.0.0.1:8000", None)?);
//!     let registration = Arc::new(Registration::new(upstream.clone()));
//!     registration
//!         .register(CacheWorker::new(
//!             WorkerConfig::default(),
//!             Arc::new(MemoryStorage::new()),
//!             upstream,
//!             Arc::new(TracingShell::new()),
//!         ))
//!         .await?;
//!
//!     let pipeline = Pipeline::new()
//!         .layer(Arc::new(LoggerMiddleware))
//!         .layer(Arc::new(WorkerMiddleware::new(registration)))
//!         .build();
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server.run(move |ctx| pipeline.handle(ctx)).await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod host;
pub mod http;
pub mod middleware;
pub mod server;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod upstream;
pub mod worker;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
pub use worker::{CacheWorker, WorkerConfig, WorkerError};
