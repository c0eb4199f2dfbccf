//! Cache error types

use thiserror::Error;

/// Cache bucket error types
///
/// Bucket writes are best-effort: callers log these and continue, the
/// primary request/response flow is never blocked by them.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Entry exceeds the per-item size limit
    #[error("cache entry of {size} bytes exceeds the {limit} byte limit")]
    EntryTooLarge { size: usize, limit: usize },

    /// Response status unfit for caching
    #[error("refusing to cache response with status {0}")]
    UncacheableStatus(http::StatusCode),
}
