//! Cache storage substrate: named generations of request → response entries.
//!
//! The worker only talks to these traits, so eviction and TTL logic run the
//! same against [`MemoryStorage`] as against any other backend.
//!
//! ## Core types
//!
//! - [`CacheStorage`]: the set of generations, addressed by name.
//! - [`CacheGeneration`]: one generation, an insertion-ordered map.
//! - [`RequestKey`]: method, request URI and an optional credential partition.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::http::{Method, Request, Response};

pub mod memory;

pub use memory::MemoryStorage;

/// Request headers that identify whose data a response is.
const CREDENTIAL_HEADERS: &[&str] = &["authorization", "cookie"];

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("quota exceeded for cache generation {generation}")]
    QuotaExceeded { generation: String },
}

/// The identity a cached entry is stored under.
///
/// Entries for different credentials never share a key: `partition` holds a
/// SHA-256 digest of the request's `Authorization` and `Cookie` headers, or
/// `None` for anonymous requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub method: Method,
    pub uri: String,
    pub partition: Option<String>,
}

impl RequestKey {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            partition: None,
        }
    }

    /// Keys `request` by method and URI alone. Used for shared static assets.
    pub fn of(request: &Request) -> Self {
        Self::new(request.method().clone(), request.uri())
    }

    /// Keys `request` by method, URI and the credentials it carries.
    pub fn credentialed(request: &Request) -> Self {
        let mut hasher = Sha256::new();
        let mut any = false;
        for name in CREDENTIAL_HEADERS {
            for value in request.headers().get_all(name) {
                hasher.update(name.as_bytes());
                hasher.update(b":");
                hasher.update(value.as_bytes());
                hasher.update(b"\n");
                any = true;
            }
        }

        let key = Self::of(request);
        if any {
            key.with_partition(hex::encode(hasher.finalize()))
        } else {
            key
        }
    }

    #[must_use]
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.uri)?;
        if let Some(partition) = &self.partition {
            write!(f, " [{}]", &partition[..partition.len().min(12)])?;
        }
        Ok(())
    }
}

/// A single named cache generation.
///
/// Implementations must keep [`keys`](Self::keys) in insertion order, and a
/// `put` over an existing key counts as a fresh insertion (the key moves to
/// the end). Capacity eviction relies on that order.
#[async_trait]
pub trait CacheGeneration: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &RequestKey) -> Result<Option<Response>, StorageError>;

    async fn put(&self, key: RequestKey, response: Response) -> Result<(), StorageError>;

    /// Returns `true` if an entry was removed.
    async fn delete(&self, key: &RequestKey) -> Result<bool, StorageError>;

    async fn keys(&self) -> Result<Vec<RequestKey>, StorageError>;

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.keys().await?.len())
    }
}

/// The collection of generations.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Opens the generation called `name`, creating it if needed.
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheGeneration>, StorageError>;

    /// Removes a generation and every entry in it. Returns `true` if it existed.
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;

    async fn has(&self, name: &str) -> Result<bool, StorageError>;

    /// Names of all existing generations, in creation order.
    async fn names(&self) -> Result<Vec<String>, StorageError>;
}
