//! Network-first and cache-first policies.

use tracing::{debug, warn};

use super::{CACHED_AT_HEADER, CacheWorker, offline_api_response};
use crate::http::{Method, Request, Response};
use crate::storage::{RequestKey, StorageError};
use crate::upstream::FetchError;

impl CacheWorker {
    /// Network, then a cached copy younger than the TTL, then a synthesized 503.
    ///
    /// Entries are partitioned by the request's credentials, so one client's
    /// replies are never served to another.
    pub(super) async fn network_first(&self, request: &Request) -> Response {
        let key = RequestKey::credentialed(request);

        match self.upstream.fetch(request).await {
            Ok(response) => {
                if response.status().is_success() {
                    let mut stamped = response.clone();
                    stamped.set_header(CACHED_AT_HEADER, self.clock.now_millis().to_string());
                    if let Err(e) = self.store_api_entry(key, stamped).await {
                        warn!(error = %e, "api cache write failed");
                    }
                }
                response
            }
            Err(e) => {
                debug!(%key, error = %e, "network failed, trying api cache");
                match self.fresh_api_entry(&key).await {
                    Ok(Some(cached)) => {
                        debug!(%key, "served from api cache");
                        cached
                    }
                    Ok(None) => offline_api_response(),
                    Err(e) => {
                        debug!(%key, error = %e, "api cache read failed");
                        offline_api_response()
                    }
                }
            }
        }
    }

    /// Stores `stamped`, then evicts the single oldest entry if the generation
    /// went over its limit.
    async fn store_api_entry(&self, key: RequestKey, stamped: Response) -> Result<(), StorageError> {
        let generation = self.storage.open(&self.config.api_cache).await?;
        generation.put(key, stamped).await?;

        let keys = generation.keys().await?;
        if keys.len() > self.config.max_api_entries {
            if let Some(oldest) = keys.first() {
                generation.delete(oldest).await?;
                debug!(evicted = %oldest, entries = keys.len() - 1, "capacity eviction");
            }
        }
        Ok(())
    }

    /// Looks `key` up in the API generation. An entry at or past the TTL, or
    /// one without a readable timestamp, is deleted and reported as missing.
    async fn fresh_api_entry(&self, key: &RequestKey) -> Result<Option<Response>, StorageError> {
        let generation = self.storage.open(&self.config.api_cache).await?;
        let Some(cached) = generation.get(key).await? else {
            return Ok(None);
        };

        let cached_at = cached
            .headers()
            .get(CACHED_AT_HEADER)
            .and_then(|v| v.trim().parse::<i64>().ok());
        let ttl = i64::try_from(self.config.ttl_ms).unwrap_or(i64::MAX);

        match cached_at {
            Some(at) if self.clock.now_millis().saturating_sub(at) < ttl => Ok(Some(cached)),
            _ => {
                generation.delete(key).await?;
                debug!(%key, "stale eviction");
                Ok(None)
            }
        }
    }

    /// Static generation, then network, then the offline page.
    pub(super) async fn cache_first(&self, request: &Request) -> Result<Response, FetchError> {
        let key = RequestKey::of(request);
        if let Some(hit) = self.static_entry(&key).await {
            debug!(%key, "served from static cache");
            return Ok(hit);
        }

        match self.upstream.fetch(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                let offline = RequestKey::new(Method::Get, self.config.offline_page.as_str());
                match self.static_entry(&offline).await {
                    Some(page) => {
                        debug!(%key, error = %e, "network failed, serving offline page");
                        Ok(page)
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn static_entry(&self, key: &RequestKey) -> Option<Response> {
        let lookup = async {
            let generation = self.storage.open(&self.config.static_cache).await?;
            generation.get(key).await
        };
        match lookup.await {
            Ok(found) => found,
            Err(e) => {
                debug!(%key, error = %e, "static cache read failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::{OFFLINE_API_BODY, WorkerConfig};
    use super::*;
    use crate::clock::ManualClock;
    use crate::http::StatusCode;
    use crate::storage::{CacheStorage, MemoryStorage};
    use crate::testing::{RecordingShell, ScriptedUpstream};

    const START: i64 = 1_760_000_000_000;

    struct Harness {
        worker: CacheWorker,
        storage: Arc<MemoryStorage>,
        upstream: Arc<ScriptedUpstream>,
        clock: Arc<ManualClock>,
    }

    fn harness_with(config: WorkerConfig, storage: MemoryStorage) -> Harness {
        let storage = Arc::new(storage);
        let upstream = Arc::new(ScriptedUpstream::new());
        let clock = Arc::new(ManualClock::new(START));
        let worker = CacheWorker::new(
            config,
            storage.clone(),
            upstream.clone(),
            Arc::new(RecordingShell::new()),
        )
        .with_clock(clock.clone());
        Harness {
            worker,
            storage,
            upstream,
            clock,
        }
    }

    fn harness() -> Harness {
        harness_with(WorkerConfig::default(), MemoryStorage::new())
    }

    fn members() -> Response {
        Response::json(StatusCode::OK, r#"{"items":[{"id":1}]}"#)
    }

    async fn api_len(h: &Harness) -> usize {
        h.storage.open("api-v2").await.unwrap().len().await.unwrap()
    }

    #[tokio::test]
    async fn success_is_stamped_in_cache_but_not_in_reply() {
        let h = harness();
        h.upstream.route(Method::Get, "/api/members", members());

        let reply = h.worker.network_first(&Request::get("/api/members")).await;
        assert_eq!(reply.status(), StatusCode::OK);
        assert!(!reply.headers().contains(CACHED_AT_HEADER));

        let api = h.storage.open("api-v2").await.unwrap();
        let stored = api
            .get(&RequestKey::new(Method::Get, "/api/members"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.headers().get(CACHED_AT_HEADER), Some(START.to_string().as_str()));
        assert_eq!(stored.payload(), reply.payload());
    }

    #[tokio::test]
    async fn error_statuses_pass_through_uncached() {
        let h = harness();
        h.upstream.route(
            Method::Get,
            "/api/loans/99",
            Response::json(StatusCode::NOT_FOUND, r#"{"error":"not found"}"#),
        );

        let reply = h.worker.network_first(&Request::get("/api/loans/99")).await;
        assert_eq!(reply.status(), StatusCode::NOT_FOUND);
        assert_eq!(api_len(&h).await, 0);
    }

    #[tokio::test]
    async fn offline_within_ttl_serves_cached_copy() {
        let h = harness();
        h.upstream.route(Method::Get, "/api/members", members());
        h.worker.network_first(&Request::get("/api/members")).await;

        h.upstream.set_online(false);
        h.clock.advance_millis(299_999);
        let reply = h.worker.network_first(&Request::get("/api/members")).await;
        assert_eq!(reply.status(), StatusCode::OK);
        assert_eq!(&reply.payload()[..], br#"{"items":[{"id":1}]}"#);
    }

    #[tokio::test]
    async fn offline_at_ttl_evicts_and_synthesizes_503() {
        let h = harness();
        h.upstream.route(Method::Get, "/api/members", members());
        h.worker.network_first(&Request::get("/api/members")).await;

        h.upstream.set_online(false);
        h.clock.advance_millis(300_000);
        let reply = h.worker.network_first(&Request::get("/api/members")).await;
        assert_eq!(reply.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(reply.headers().get("content-type"), Some("application/json"));
        assert_eq!(&reply.payload()[..], OFFLINE_API_BODY.as_bytes());
        assert_eq!(api_len(&h).await, 0);
    }

    #[tokio::test]
    async fn entry_without_timestamp_counts_as_stale() {
        let h = harness();
        let api = h.storage.open("api-v2").await.unwrap();
        let key = RequestKey::new(Method::Get, "/api/penalties");
        api.put(key.clone(), members()).await.unwrap();

        h.upstream.set_online(false);
        let reply = h.worker.network_first(&Request::get("/api/penalties")).await;
        assert_eq!(reply.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(api.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fifty_first_entry_evicts_exactly_the_oldest() {
        let h = harness();
        for i in 0..51 {
            let uri = format!("/api/members/{i}");
            h.upstream.route(Method::Get, &uri, members());
            h.worker.network_first(&Request::get(&uri)).await;
        }

        let api = h.storage.open("api-v2").await.unwrap();
        let keys = api.keys().await.unwrap();
        assert_eq!(keys.len(), 50);
        assert_eq!(keys[0].uri, "/api/members/1");
        assert!(api
            .get(&RequestKey::new(Method::Get, "/api/members/0"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn eviction_removes_one_entry_per_write_even_when_far_over() {
        let mut config = WorkerConfig::default();
        config.max_api_entries = 2;
        let h = harness_with(config, MemoryStorage::new());

        // Seed past the limit directly, as racing writers could.
        let api = h.storage.open("api-v2").await.unwrap();
        for uri in ["/api/a", "/api/b", "/api/c", "/api/d"] {
            api.put(RequestKey::new(Method::Get, uri), members()).await.unwrap();
        }

        h.upstream.route(Method::Get, "/api/e", members());
        h.worker.network_first(&Request::get("/api/e")).await;

        let uris: Vec<_> = api.keys().await.unwrap().into_iter().map(|k| k.uri).collect();
        assert_eq!(uris, vec!["/api/b", "/api/c", "/api/d", "/api/e"]);
    }

    #[tokio::test]
    async fn cache_write_failure_keeps_network_reply() {
        let h = harness_with(WorkerConfig::default(), MemoryStorage::with_quota(0));
        h.upstream.route(Method::Get, "/api/members", members());

        let reply = h.worker.network_first(&Request::get("/api/members")).await;
        assert_eq!(reply.status(), StatusCode::OK);
        assert_eq!(api_len(&h).await, 0);
    }

    #[tokio::test]
    async fn cache_first_prefers_cache_over_network() {
        let h = harness();
        let statics = h.storage.open("static-v2").await.unwrap();
        statics
            .put(RequestKey::new(Method::Get, "/"), Response::new(StatusCode::OK).body("cached shell"))
            .await
            .unwrap();
        h.upstream.route(Method::Get, "/", Response::new(StatusCode::OK).body("network shell"));

        let reply = h.worker.cache_first(&Request::get("/")).await.unwrap();
        assert_eq!(&reply.payload()[..], b"cached shell");
        assert_eq!(h.upstream.calls_to("/"), 0);
    }

    #[tokio::test]
    async fn cache_first_miss_goes_to_network_without_storing() {
        let h = harness();
        h.upstream.route(Method::Get, "/assets/app.js", Response::new(StatusCode::OK).body("js"));

        let reply = h.worker.cache_first(&Request::get("/assets/app.js")).await.unwrap();
        assert_eq!(&reply.payload()[..], b"js");
        let statics = h.storage.open("static-v2").await.unwrap();
        assert_eq!(statics.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cache_first_offline_serves_offline_page_or_propagates() {
        let h = harness();
        h.upstream.set_online(false);
        let err = h.worker.cache_first(&Request::get("/reports")).await.unwrap_err();
        assert!(matches!(err, FetchError::Unreachable(_)));

        let statics = h.storage.open("static-v2").await.unwrap();
        statics
            .put(
                RequestKey::new(Method::Get, "/offline.html"),
                Response::new(StatusCode::OK).body("offline"),
            )
            .await
            .unwrap();
        let reply = h.worker.cache_first(&Request::get("/reports")).await.unwrap();
        assert_eq!(&reply.payload()[..], b"offline");
    }

    #[tokio::test]
    async fn offline_replies_stay_with_their_credentials() {
        let h = harness();
        h.upstream.route(
            Method::Get,
            "/api/members/me",
            Response::json(StatusCode::OK, r#"{"me":"alice"}"#),
        );
        let as_alice = Request::get("/api/members/me").header("Authorization", "Bearer alice");
        let as_bob = Request::get("/api/members/me").header("Authorization", "Bearer bob");
        h.worker.network_first(&as_alice).await;

        h.upstream.set_online(false);
        let bob = h.worker.network_first(&as_bob).await;
        assert_eq!(bob.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(&bob.payload()[..], OFFLINE_API_BODY.as_bytes());

        let anonymous = h.worker.network_first(&Request::get("/api/members/me")).await;
        assert_eq!(anonymous.status(), StatusCode::SERVICE_UNAVAILABLE);

        let alice = h.worker.network_first(&as_alice).await;
        assert_eq!(alice.status(), StatusCode::OK);
        assert_eq!(&alice.payload()[..], br#"{"me":"alice"}"#);
    }

    #[tokio::test]
    async fn refetched_entry_becomes_newest_without_growing() {
        let h = harness();
        for i in 0..50 {
            let uri = format!("/api/members/{i}");
            h.upstream.route(Method::Get, &uri, members());
            h.worker.network_first(&Request::get(&uri)).await;
        }
        assert_eq!(api_len(&h).await, 50);

        h.clock.advance_millis(1_000);
        h.worker.network_first(&Request::get("/api/members/0")).await;
        assert_eq!(api_len(&h).await, 50);

        h.upstream.route(Method::Get, "/api/members/50", members());
        h.worker.network_first(&Request::get("/api/members/50")).await;

        let api = h.storage.open("api-v2").await.unwrap();
        let keys = api.keys().await.unwrap();
        assert_eq!(keys.len(), 50);
        assert_eq!(keys[0].uri, "/api/members/2");
        assert_eq!(keys[48].uri, "/api/members/0");
        assert!(api
            .get(&RequestKey::new(Method::Get, "/api/members/1"))
            .await
            .unwrap()
            .is_none());
        let refreshed = api
            .get(&RequestKey::new(Method::Get, "/api/members/0"))
            .await
            .unwrap()
            .unwrap();
        let stamp = (START + 1_000).to_string();
        assert_eq!(refreshed.headers().get(CACHED_AT_HEADER), Some(stamp.as_str()));
    }
}
