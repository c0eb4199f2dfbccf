//! Caching strategies
//!
//! Two request-serving strategies plus the offline fallbacks they share:
//! - cache-first: serve from cache, refresh stale entries in the
//!   background, fall through to the network on a miss
//! - network-first: try the network, fall back to cache, then to the
//!   offline document for navigations
//!
//! Both strategies always produce a response. Network and storage
//! failures degrade to synthesized 503 responses matched to what the
//! caller can render, never to an error the caller must handle.

use std::sync::Arc;

use bytes::Bytes;
use http::{header, HeaderMap, StatusCode};
use tracing::{debug, warn};

use crate::cache::{BucketKind, BucketSet, CacheKey, StoredResponse};
use crate::constants::{PLACEHOLDER_ICON, ROOT_DOCUMENT};
use crate::error::ServiceError;
use crate::interceptor::{Destination, Request, RequestMode};
use crate::net::{FetchRequest, FetchResponse, Fetcher, ResponseKind};
use crate::store::DurableStore;

/// Offline fallback document served when a navigation cannot be
/// satisfied from network or cache
///
/// Reloads itself as soon as the device comes back online.
const OFFLINE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Offline</title>
  <style>
    body { font-family: system-ui, sans-serif; text-align: center; padding: 4rem 1rem; }
    h1 { font-size: 1.5rem; }
    a { color: #0066cc; }
  </style>
</head>
<body>
  <h1>You are offline</h1>
  <p>This page is not available offline yet. Previously visited pages still work.</p>
  <p><a href="/">Go to the home page</a></p>
  <script>
    window.addEventListener('online', function () { window.location.reload(); });
  </script>
</body>
</html>
"#;

/// Executes the caching strategies against the bucket set, the durable
/// store and the network
///
/// Cheap to clone; background refresh tasks carry a clone.
#[derive(Clone)]
pub struct StrategyEngine {
    store: DurableStore,
    buckets: BucketSet,
    fetcher: Arc<dyn Fetcher>,
    staleness: chrono::Duration,
}

impl StrategyEngine {
    pub fn new(
        store: DurableStore,
        buckets: BucketSet,
        fetcher: Arc<dyn Fetcher>,
        staleness: chrono::Duration,
    ) -> Self {
        Self {
            store,
            buckets,
            fetcher,
            staleness,
        }
    }

    /// Cache-first with background refresh
    ///
    /// A hit is served immediately, regardless of age. A hit older than
    /// the staleness threshold additionally schedules a background
    /// renewal when the device is online; the renewal never delays the
    /// response. A miss goes to the network and caches the result.
    pub async fn cache_first(&self, request: &Request) -> FetchResponse {
        let key = CacheKey::new(&request.url);

        if let Some((entry, owner)) = self.buckets.match_any(&key).await {
            if self.fetcher.is_online() && self.entry_is_stale(&key) {
                debug!(url = %key, bucket = %owner, "stale hit, scheduling background refresh");
                self.spawn_refresh(key, owner);
            }
            return entry.to_response();
        }

        match self.fetcher.fetch(&to_fetch_request(request)).await {
            Ok(response) => {
                if response.is_ok() && response.kind == ResponseKind::Basic {
                    self.store_response(&key, BucketKind::Dynamic, &response)
                        .await;
                }
                response
            }
            Err(err) => {
                debug!(url = %key, error = %err, "cache miss and fetch failed");
                self.asset_fallback(request).await
            }
        }
    }

    /// Network-first with cache fallback
    ///
    /// An OK network response is cached and returned. Anything else, a
    /// transport failure or a failure status, falls back to the cached
    /// copy; failing that, navigations get the cached root document or
    /// the offline fallback page, and other requests surface the
    /// network's own error response or a synthesized 503.
    pub async fn network_first(&self, request: &Request) -> FetchResponse {
        let key = CacheKey::new(&request.url);
        let navigation = request.mode == RequestMode::Navigate;

        let network = self.fetcher.fetch(&to_fetch_request(request)).await;
        match &network {
            Ok(response) if response.is_ok() => {
                let kind = if navigation {
                    BucketKind::Pages
                } else {
                    BucketKind::Dynamic
                };
                self.store_response(&key, kind, response).await;
                return response.clone();
            }
            Ok(response) => {
                debug!(url = %key, status = %response.status, "network returned failure status, falling back to cache");
            }
            Err(err) => {
                debug!(url = %key, error = %err, "network failed, falling back to cache");
            }
        }

        if let Some((entry, _)) = self.buckets.match_any(&key).await {
            return entry.to_response();
        }

        if navigation {
            let root = CacheKey::new(ROOT_DOCUMENT);
            if let Some((entry, _)) = self.buckets.match_any(&root).await {
                return entry.to_response();
            }
            return offline_document();
        }

        match network {
            Ok(response) => response,
            Err(_) => error_response(request),
        }
    }

    /// Write a response into the given bucket and record its metadata
    ///
    /// Best-effort: failures are logged and the response still flows to
    /// the caller.
    async fn store_response(&self, key: &CacheKey, kind: BucketKind, response: &FetchResponse) {
        let bucket = self.buckets.open(kind);
        if let Err(err) = bucket
            .put(key.clone(), StoredResponse::from_fetch(response))
            .await
        {
            warn!(url = %key, bucket = bucket.name(), error = %err, "cache write failed");
            return;
        }

        if let Err(err) = self.store.record_cached(key.as_str(), bucket.name()) {
            warn!(url = %key, error = %err, "cache metadata write failed");
        }
    }

    fn entry_is_stale(&self, key: &CacheKey) -> bool {
        match self.store.cached_meta(key.as_str()) {
            Ok(Some(meta)) => meta.is_stale(self.staleness),
            // No metadata means we cannot date the entry; leave it alone
            Ok(None) => false,
            Err(err) => {
                warn!(url = %key, error = %err, "staleness lookup failed");
                false
            }
        }
    }

    /// Re-fetch an entry and overwrite it in its owning bucket
    fn spawn_refresh(&self, key: CacheKey, bucket_name: String) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.refresh(&key, &bucket_name).await {
                debug!(url = %key, error = %err, "background refresh failed");
            }
        });
    }

    async fn refresh(&self, key: &CacheKey, bucket_name: &str) -> Result<(), ServiceError> {
        let response = self.fetcher.fetch(&FetchRequest::get(key.as_str())).await?;
        if !response.is_ok() {
            debug!(url = %key, status = %response.status, "refresh response not ok, keeping entry");
            return Ok(());
        }

        let bucket = self.buckets.open_named(bucket_name);
        bucket
            .put(key.clone(), StoredResponse::from_fetch(&response))
            .await?;
        self.store.record_cached(key.as_str(), bucket_name)?;
        debug!(url = %key, bucket = bucket_name, "background refresh complete");
        Ok(())
    }

    /// Fallback for a failed asset fetch: images degrade to the cached
    /// placeholder icon, everything else to a synthesized error
    async fn asset_fallback(&self, request: &Request) -> FetchResponse {
        if request.destination == Destination::Image {
            let icon = CacheKey::new(PLACEHOLDER_ICON);
            if let Some((entry, _)) = self.buckets.match_any(&icon).await {
                return entry.to_response();
            }
            return FetchResponse {
                status: StatusCode::NOT_FOUND,
                headers: HeaderMap::new(),
                body: Bytes::new(),
                kind: ResponseKind::Basic,
            };
        }

        error_response(request)
    }
}

/// The offline fallback page as a ready-to-serve response
pub fn offline_document() -> FetchResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/html; charset=utf-8"),
    );
    FetchResponse {
        status: StatusCode::SERVICE_UNAVAILABLE,
        headers,
        body: Bytes::from_static(OFFLINE_HTML.as_bytes()),
        kind: ResponseKind::Basic,
    }
}

/// Synthesize a 503 matched to what the requester can render
///
/// Documents get the offline page, JSON consumers a JSON error body,
/// stylesheets and scripts inert placeholders, everything else plain
/// text.
pub fn error_response(request: &Request) -> FetchResponse {
    let accept = request
        .headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if request.destination == Destination::Document || accept.contains("text/html") {
        return offline_document();
    }

    let (content_type, body): (&str, &str) = if accept.contains("application/json") {
        (
            "application/json",
            r#"{"error":"This request is not available offline","code":"OFFLINE"}"#,
        )
    } else {
        match request.destination {
            Destination::Style => ("text/css", "/* offline */"),
            Destination::Script => ("application/javascript", "// offline"),
            _ => ("text/plain", "Offline"),
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        http::HeaderValue::from_str(content_type).unwrap_or(http::HeaderValue::from_static(
            "text/plain",
        )),
    );
    FetchResponse {
        status: StatusCode::SERVICE_UNAVAILABLE,
        headers,
        body: Bytes::from(body.to_string()),
        kind: ResponseKind::Basic,
    }
}

fn to_fetch_request(request: &Request) -> FetchRequest {
    FetchRequest {
        method: request.method.clone(),
        url: request.url.clone(),
        headers: request.headers.clone(),
        body: request.body.clone(),
        mode: crate::net::CorsMode::SameOrigin,
    }
}
