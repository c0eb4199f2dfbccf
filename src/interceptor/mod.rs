//! Request interception and routing
//!
//! Classifies every incoming request and routes it to the right
//! strategy: navigations go network-first, static assets cache-first,
//! API writes are queued while offline, and excluded traffic passes
//! through untouched. A superseded instance intercepts nothing.

use std::sync::Arc;

use bytes::Bytes;
use http::{header, HeaderMap, Method, StatusCode};
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::{ASSET_EXTENSION_PATTERN, EXCLUDED_PATH_PREFIXES, FONT_HOSTS};
use crate::error::ServiceError;
use crate::lifecycle::Lifecycle;
use crate::net::{FetchResponse, Fetcher, ResponseKind};
use crate::store::{DurableStore, NewMutation};
use crate::strategy::StrategyEngine;

/// How the requester will use the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Top-level document navigation
    Navigate,
    /// Subresource or data fetch
    Resource,
}

/// What kind of resource the requester expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Document,
    Script,
    Style,
    Image,
    Font,
    Other,
}

/// An intercepted request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub mode: RequestMode,
    pub destination: Destination,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Request {
    /// A plain subresource GET
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            mode: RequestMode::Resource,
            destination: Destination::Other,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// A top-level document navigation
    pub fn navigation(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            mode: RequestMode::Navigate,
            destination: Destination::Document,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Path component of the URL, without query or fragment
    pub fn path(&self) -> String {
        if self.url.starts_with('/') {
            let end = self.url.find(['?', '#']).unwrap_or(self.url.len());
            return self.url[..end].to_string();
        }
        match url::Url::parse(&self.url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => self.url.clone(),
        }
    }

    /// Host component of an absolute URL, if any
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_string))
    }
}

/// Routing class assigned to an intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Never intercepted; delivered by the caller directly
    Excluded,
    /// Read against an internal API route
    ApiRead,
    /// Mutating request against an internal API route
    ApiWrite,
    /// Top-level document navigation
    Navigation,
    /// Static asset by extension or font host
    StaticAsset,
    /// Everything else
    Dynamic,
}

/// Result of interception
#[derive(Debug)]
pub enum Outcome {
    /// Serve this response to the requester
    Respond(FetchResponse),
    /// Deliver the request over the network untouched
    Passthrough,
}

/// Routes intercepted requests to strategies, the mutation queue, or
/// straight through
#[derive(Clone)]
pub struct Interceptor {
    engine: StrategyEngine,
    store: DurableStore,
    fetcher: Arc<dyn Fetcher>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    asset_pattern: Regex,
    api_prefix: String,
    excluded_hosts: Vec<String>,
}

impl Interceptor {
    pub fn new(
        engine: StrategyEngine,
        store: DurableStore,
        fetcher: Arc<dyn Fetcher>,
        lifecycle: Arc<Mutex<Lifecycle>>,
        config: &Config,
    ) -> Result<Self, ServiceError> {
        let asset_pattern = Regex::new(ASSET_EXTENSION_PATTERN)
            .map_err(|e| ServiceError::Config(format!("invalid asset pattern: {}", e)))?;

        Ok(Self {
            engine,
            store,
            fetcher,
            lifecycle,
            asset_pattern,
            api_prefix: config.api_prefix.clone(),
            excluded_hosts: config.excluded_hosts.clone(),
        })
    }

    /// Assign a routing class; pure function of the request
    pub fn classify(&self, request: &Request) -> RequestClass {
        let host = request.host();
        if let Some(host) = &host {
            if self.excluded_hosts.iter().any(|h| h == host) {
                return RequestClass::Excluded;
            }
        }

        let path = request.path();
        if EXCLUDED_PATH_PREFIXES.iter().any(|p| path.starts_with(p)) {
            return RequestClass::Excluded;
        }

        if path.starts_with(&self.api_prefix) {
            return if request.method == Method::GET || request.method == Method::HEAD {
                RequestClass::ApiRead
            } else {
                RequestClass::ApiWrite
            };
        }

        // Only safe reads are cacheable; other writes go straight out
        if request.method != Method::GET && request.method != Method::HEAD {
            return RequestClass::Excluded;
        }

        if let Some(host) = &host {
            if FONT_HOSTS.contains(&host.as_str()) {
                return RequestClass::StaticAsset;
            }
        }

        if request.mode == RequestMode::Navigate {
            return RequestClass::Navigation;
        }

        if self.asset_pattern.is_match(&path) {
            return RequestClass::StaticAsset;
        }

        RequestClass::Dynamic
    }

    /// Intercept one request
    pub async fn handle(&self, request: &Request) -> Outcome {
        if self.lifecycle.lock().is_superseded() {
            return Outcome::Passthrough;
        }

        let class = self.classify(request);
        debug!(url = %request.url, class = ?class, "request classified");

        match class {
            RequestClass::Excluded | RequestClass::ApiRead => Outcome::Passthrough,
            RequestClass::ApiWrite => self.handle_api_write(request),
            RequestClass::Navigation | RequestClass::Dynamic => {
                Outcome::Respond(self.engine.network_first(request).await)
            }
            RequestClass::StaticAsset => {
                Outcome::Respond(self.engine.cache_first(request).await)
            }
        }
    }

    /// API writes pass through while online; offline they are queued
    /// byte-for-byte and acknowledged with a 202
    fn handle_api_write(&self, request: &Request) -> Outcome {
        if self.fetcher.is_online() {
            return Outcome::Passthrough;
        }

        let mutation = NewMutation {
            route: request.url.clone(),
            method: request.method.to_string(),
            headers: request
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.to_string(), v.to_string()))
                })
                .collect(),
            body: request.body.as_ref().map(|b| b.to_vec()).unwrap_or_default(),
        };

        match self.store.queue_mutation(&mutation) {
            Ok(id) => {
                info!(url = %request.url, id, "mutation queued for replay");
                Outcome::Respond(json_response(
                    StatusCode::ACCEPTED,
                    &format!(
                        r#"{{"queued":true,"id":{},"message":"Saved offline, will sync when connection returns"}}"#,
                        id
                    ),
                ))
            }
            Err(err) => {
                warn!(url = %request.url, error = %err, "failed to queue mutation");
                Outcome::Respond(json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    r#"{"queued":false,"error":"offline storage unavailable"}"#,
                ))
            }
        }
    }
}

fn json_response(status: StatusCode, body: &str) -> FetchResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    FetchResponse {
        status,
        headers,
        body: Bytes::from(body.to_string()),
        kind: ResponseKind::Basic,
    }
}
