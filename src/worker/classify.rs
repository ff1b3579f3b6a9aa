//! Request classification: which policy handles a request.

use super::WorkerConfig;
use crate::http::{Method, Request};

/// The policy a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Straight to the network; no cache lookup, no cache write, no fallback.
    Bypass,
    /// API `GET`: network, then a fresh-enough cached copy, then a synthesized 503.
    NetworkFirst,
    /// Static asset: static generation, then network, then the offline page.
    CacheFirst,
}

impl RequestClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bypass => "bypass",
            Self::NetworkFirst => "network-first",
            Self::CacheFirst => "cache-first",
        }
    }
}

/// Classifies `request` under `config`.
///
/// Non-`GET` requests and paths containing a never-cache segment bypass the
/// cache wherever they live. Remaining paths under the API prefix are
/// network-first; everything else is a static asset.
pub fn classify(config: &WorkerConfig, request: &Request) -> RequestClass {
    let path = request.path();

    if request.method() != &Method::Get
        || config
            .never_cache
            .iter()
            .any(|segment| path.contains(segment.as_str()))
    {
        return RequestClass::Bypass;
    }

    if path.starts_with(config.api_prefix.as_str()) {
        RequestClass::NetworkFirst
    } else {
        RequestClass::CacheFirst
    }
}
