// Error types module

use thiserror::Error;

use crate::cache::CacheError;
use crate::lifecycle::LifecycleError;
use crate::net::FetchError;
use crate::store::StoreError;

/// Centralized error type for the cache engine
///
/// Categorizes errors into the main failure domains so callers can map
/// them to logging fields and degraded-mode behavior. Network and cache
/// failures are recovered locally by the strategies and never surface
/// through the request path; this type covers setup and control-plane
/// operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Configuration errors (invalid YAML, bad values, unreadable file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Durable store errors (sqlite, schema mismatch)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Cache bucket errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Network fetch errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Illegal lifecycle transition
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}
