//! Upstream API access: the network side of every cache policy.
//!
//! An [`Upstream`] only fails on transport problems. A `404` or `500` from the
//! backend is a successful fetch of an unsuccessful response; the worker's
//! policies look at the status themselves.

use async_trait::async_trait;
use thiserror::Error;

use crate::http::{Request, Response};

pub mod http;

pub use self::http::HttpUpstream;

/// A fetch that produced no response at all.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    #[error("request cannot be forwarded: {0}")]
    InvalidRequest(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

/// Something that can turn a [`Request`] into a [`Response`] over the network.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}
