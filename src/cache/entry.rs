//! Cache key and entry types
//!
//! This module defines the core cache entry structures:
//! - `CacheKey`: normalized request URL identifying a cached response
//! - `StoredResponse`: a cached HTTP response with its headers, body
//!   and write timestamp

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, StatusCode};

use crate::net::{FetchResponse, ResponseKind};

/// Cache key identifying a cached response
///
/// Keys are normalized by stripping the URL fragment; two requests that
/// differ only in fragment address the same entry.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(url: &str) -> Self {
        let normalized = match url.split_once('#') {
            Some((base, _fragment)) => base,
            None => url,
        };
        Self(normalized.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

/// A cached HTTP response
///
/// Entries are updated in place on refresh and never proactively
/// expired; the design favors total availability over freshness.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub kind: ResponseKind,
    /// Insertion or last-refresh time
    pub stored_at: DateTime<Utc>,
}

impl StoredResponse {
    /// Capture a network response for storage
    pub fn from_fetch(response: &FetchResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            kind: response.kind,
            stored_at: Utc::now(),
        }
    }

    /// Reconstitute the response for delivery to the caller
    pub fn to_response(&self) -> FetchResponse {
        FetchResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            kind: self.kind,
        }
    }

    /// Approximate size of this entry in bytes
    pub fn size_bytes(&self) -> usize {
        let header_size: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.as_str().len() + value.len())
            .sum();
        self.body.len() + header_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response() -> FetchResponse {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            "text/html".parse().unwrap(),
        );
        FetchResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from("<html></html>"),
            kind: ResponseKind::Basic,
        }
    }

    #[test]
    fn test_cache_key_strips_fragment() {
        assert_eq!(CacheKey::new("/profile#section").as_str(), "/profile");
        assert_eq!(CacheKey::new("/profile").as_str(), "/profile");
    }

    #[test]
    fn test_cache_keys_differing_only_in_fragment_are_equal() {
        assert_eq!(CacheKey::new("/page#a"), CacheKey::new("/page#b"));
        assert_ne!(CacheKey::new("/page?a=1"), CacheKey::new("/page?a=2"));
    }

    #[test]
    fn test_stored_response_roundtrip() {
        let original = sample_response();
        let stored = StoredResponse::from_fetch(&original);
        let restored = stored.to_response();

        assert_eq!(restored.status, original.status);
        assert_eq!(restored.body, original.body);
        assert_eq!(restored.headers, original.headers);
        assert_eq!(restored.kind, original.kind);
    }

    #[test]
    fn test_size_includes_body_and_headers() {
        let stored = StoredResponse::from_fetch(&sample_response());
        assert!(stored.size_bytes() > stored.body.len());
    }
}
