//! Per-request context: the request plus the connection it arrived on.

use std::net::SocketAddr;

use crate::Request;

/// Per-request context handed down the middleware chain.
pub struct Context {
    request: Request,
    peer: Option<SocketAddr>,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            peer: None,
        }
    }

    /// Records the remote address the request arrived from.
    #[must_use]
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Consumes the context, keeping only the request.
    pub fn into_request(self) -> Request {
        self.request
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Deserializes the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.request.body_bytes())
    }
}
