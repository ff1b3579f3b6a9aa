//! In-process cache storage.
//!
//! Each generation keeps its entries in a `Vec` ordered by insertion, which is
//! the order capacity eviction walks. Generations are small (the API
//! generation is bounded by the worker), so lookups scan linearly.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::{CacheGeneration, CacheStorage, RequestKey, StorageError};
use crate::http::Response;

/// Storage that lives for the lifetime of the process.
///
/// # Examples
///
/// ```
/// use swgate::http::{Request, Response, StatusCode};
/// use swgate::storage::{CacheStorage, MemoryStorage, RequestKey};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let storage = MemoryStorage::new();
/// let api = storage.open("api-v2").await.unwrap();
/// let key = RequestKey::of(&Request::get("/api/members"));
/// api.put(key.clone(), Response::new(StatusCode::OK)).await.unwrap();
/// assert!(api.get(&key).await.unwrap().is_some());
/// # }
/// ```
#[derive(Default)]
pub struct MemoryStorage {
    generations: RwLock<Vec<Arc<MemoryGeneration>>>,
    quota: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage whose generations refuse to hold more than `entries` entries.
    /// A `put` of a new key beyond that fails with [`StorageError::QuotaExceeded`].
    pub fn with_quota(entries: usize) -> Self {
        Self {
            generations: RwLock::new(Vec::new()),
            quota: Some(entries),
        }
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheGeneration>, StorageError> {
        if let Some(found) = self.generations.read().await.iter().find(|g| g.name == name) {
            return Ok(found.clone());
        }

        let mut generations = self.generations.write().await;
        // Another task may have created it between the two locks.
        if let Some(found) = generations.iter().find(|g| g.name == name) {
            return Ok(found.clone());
        }
        debug!(generation = name, "creating cache generation");
        let created = Arc::new(MemoryGeneration::new(name, self.quota));
        generations.push(created.clone());
        Ok(created)
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let removed = {
            let mut generations = self.generations.write().await;
            let position = generations.iter().position(|g| g.name == name);
            position.map(|i| generations.remove(i))
        };
        match removed {
            Some(generation) => {
                // Handles still held elsewhere must not keep serving entries.
                generation.entries.lock().await.clear();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn has(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.generations.read().await.iter().any(|g| g.name == name))
    }

    async fn names(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .generations
            .read()
            .await
            .iter()
            .map(|g| g.name.clone())
            .collect())
    }
}

/// One generation of [`MemoryStorage`].
pub struct MemoryGeneration {
    name: String,
    quota: Option<usize>,
    entries: Mutex<Vec<(RequestKey, Response)>>,
}

impl MemoryGeneration {
    fn new(name: &str, quota: Option<usize>) -> Self {
        Self {
            name: name.to_owned(),
            quota,
            entries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CacheGeneration for MemoryGeneration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &RequestKey) -> Result<Option<Response>, StorageError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, r)| r.clone()))
    }

    async fn put(&self, key: RequestKey, response: Response) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        let existing = entries.iter().position(|(k, _)| *k == key);
        if existing.is_none() && self.quota.is_some_and(|q| entries.len() >= q) {
            return Err(StorageError::QuotaExceeded {
                generation: self.name.clone(),
            });
        }
        if let Some(i) = existing {
            entries.remove(i);
        }
        entries.push((key, response));
        Ok(())
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool, StorageError> {
        let mut entries = self.entries.lock().await;
        match entries.iter().position(|(k, _)| k == key) {
            Some(i) => {
                entries.remove(i);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> Result<Vec<RequestKey>, StorageError> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.entries.lock().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, StatusCode};

    fn key(uri: &str) -> RequestKey {
        RequestKey::new(Method::Get, uri)
    }

    fn ok(body: &str) -> Response {
        Response::new(StatusCode::OK).body(body.to_owned())
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let storage = MemoryStorage::new();
        let a = storage.open("api-v2").await.unwrap();
        a.put(key("/api/members"), ok("[]")).await.unwrap();
        let b = storage.open("api-v2").await.unwrap();
        assert_eq!(b.len().await.unwrap(), 1);
        assert_eq!(storage.names().await.unwrap(), vec!["api-v2"]);
    }

    #[tokio::test]
    async fn keys_follow_insertion_order_and_reput_moves_to_end() {
        let storage = MemoryStorage::new();
        let g = storage.open("api-v2").await.unwrap();
        for uri in ["/api/a", "/api/b", "/api/c"] {
            g.put(key(uri), ok(uri)).await.unwrap();
        }
        g.put(key("/api/a"), ok("again")).await.unwrap();

        let order: Vec<_> = g.keys().await.unwrap().into_iter().map(|k| k.uri).collect();
        assert_eq!(order, vec!["/api/b", "/api/c", "/api/a"]);
        let body = g.get(&key("/api/a")).await.unwrap().unwrap();
        assert_eq!(&body.payload()[..], b"again");
    }

    #[tokio::test]
    async fn key_includes_method() {
        let storage = MemoryStorage::new();
        let g = storage.open("static-v2").await.unwrap();
        g.put(key("/"), ok("shell")).await.unwrap();
        let head = RequestKey::new(Method::Head, "/");
        assert!(g.get(&head).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_generation_empties_outstanding_handles() {
        let storage = MemoryStorage::new();
        let old = storage.open("api-v1").await.unwrap();
        old.put(key("/api/members"), ok("[]")).await.unwrap();

        assert!(storage.delete("api-v1").await.unwrap());
        assert!(!storage.has("api-v1").await.unwrap());
        assert!(old.get(&key("/api/members")).await.unwrap().is_none());
        assert!(!storage.delete("api-v1").await.unwrap());

        let reopened = storage.open("api-v1").await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn quota_rejects_new_keys_but_allows_replacement() {
        let storage = MemoryStorage::with_quota(1);
        let g = storage.open("api-v2").await.unwrap();
        g.put(key("/api/a"), ok("1")).await.unwrap();
        g.put(key("/api/a"), ok("2")).await.unwrap();
        let err = g.put(key("/api/b"), ok("3")).await.unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
    }
}
