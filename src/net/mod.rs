//! Network fetch abstraction
//!
//! This module defines the `Fetcher` trait the strategies and controller
//! depend on, plus:
//! - `FetchRequest` / `FetchResponse`: the internal HTTP exchange model
//! - `Connectivity`: shared online/offline signal with change notification
//! - `HttpFetcher`: reqwest-backed implementation used in production

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Cross-origin mode of an outgoing fetch
///
/// The bulk controller uses `NoCors` so opaque cross-origin responses
/// still count as cacheable successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorsMode {
    SameOrigin,
    NoCors,
}

/// Visibility class of a fetched response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Same-origin response with full visibility
    Basic,
    /// Cross-origin response fetched with CORS
    Cors,
    /// Cross-origin response fetched without CORS; body and status opaque
    Opaque,
}

/// Fetch error types
#[derive(Debug, Error)]
pub enum FetchError {
    /// Device reports no connectivity
    #[error("device is offline")]
    Offline,

    /// Request exceeded the fetch timeout
    #[error("fetch timed out")]
    Timeout,

    /// Transport-level failure (DNS, connection reset, TLS)
    #[error("transport error: {0}")]
    Transport(String),

    /// Request could not be constructed (bad method or URL)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_builder() {
            FetchError::InvalidRequest(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// An outgoing network request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: CorsMode,
}

impl FetchRequest {
    /// A plain same-origin GET
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            mode: CorsMode::SameOrigin,
        }
    }

    pub fn with_mode(mut self, mode: CorsMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }
}

/// A resolved network response
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub kind: ResponseKind,
}

impl FetchResponse {
    /// Whether the response carries a success status
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    /// Content-Type header value, if present and valid UTF-8
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Fetcher trait for network delivery (production HTTP client or a
/// scripted stand-in under test)
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Deliver a request over the network
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;

    /// Current connectivity as reported by the device
    fn is_online(&self) -> bool;
}

/// Shared online/offline signal
///
/// Wraps a watch channel so interested tasks (the reconnection
/// synchronizer) can observe offline-to-online transitions while
/// synchronous callers read the current value.
#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Update the connectivity state, notifying watchers on change
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe to connectivity changes
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Production fetcher backed by reqwest
pub struct HttpFetcher {
    client: reqwest::Client,
    connectivity: Connectivity,
    origin: Option<String>,
}

impl HttpFetcher {
    pub fn new(
        connectivity: Connectivity,
        origin: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::from)?;

        Ok(Self {
            client,
            connectivity,
            origin,
        })
    }

    /// Classify the response visibility from the request's mode and origin
    fn response_kind(&self, request: &FetchRequest) -> ResponseKind {
        let same_origin = match &self.origin {
            Some(origin) => request.url.starts_with(origin.as_str()) || request.url.starts_with('/'),
            // Without a configured origin, relative URLs are the only
            // requests known to be same-origin.
            None => request.url.starts_with('/'),
        };

        if same_origin {
            ResponseKind::Basic
        } else if request.mode == CorsMode::NoCors {
            ResponseKind::Opaque
        } else {
            ResponseKind::Cors
        }
    }

    /// Resolve a possibly-relative URL against the configured origin
    fn absolute_url(&self, url: &str) -> Result<String, FetchError> {
        if !url.starts_with('/') {
            return Ok(url.to_string());
        }
        match &self.origin {
            Some(origin) => Ok(format!("{}{}", origin.trim_end_matches('/'), url)),
            None => Err(FetchError::InvalidRequest(format!(
                "relative URL {} requires a configured origin",
                url
            ))),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        if !self.connectivity.is_online() {
            return Err(FetchError::Offline);
        }

        let kind = self.response_kind(request);
        let url = self.absolute_url(&request.url)?;

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(FetchResponse {
            status,
            headers,
            body,
            kind,
        })
    }

    fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }
}
