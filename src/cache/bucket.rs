//! Single cache bucket implementation
//!
//! A bucket is a named, independently managed partition of cached
//! responses backed by a moka concurrent map. Buckets carry no TTL and
//! no eviction policy: entries live until the bucket itself is deleted
//! during a version change.

use super::entry::{CacheKey, StoredResponse};
use super::error::CacheError;

/// Per-item size limit (10 MB); a single oversized response must not
/// crowd out the rest of the offline working set
const MAX_ITEM_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// A named partition of cached responses
#[derive(Clone)]
pub struct Bucket {
    name: String,
    entries: moka::future::Cache<CacheKey, StoredResponse>,
}

impl Bucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: moka::future::Cache::builder().build(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a cached response
    pub async fn get(&self, key: &CacheKey) -> Option<StoredResponse> {
        self.entries.get(key).await
    }

    /// Insert or overwrite a cached response
    pub async fn put(&self, key: CacheKey, response: StoredResponse) -> Result<(), CacheError> {
        let size = response.size_bytes();
        if size > MAX_ITEM_SIZE_BYTES {
            return Err(CacheError::EntryTooLarge {
                size,
                limit: MAX_ITEM_SIZE_BYTES,
            });
        }

        self.entries.insert(key, response).await;
        Ok(())
    }

    pub async fn remove(&self, key: &CacheKey) {
        self.entries.invalidate(key).await;
    }

    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.entries.get(key).await.is_some()
    }

    /// Approximate entry count (moka is eventually consistent)
    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{FetchResponse, ResponseKind};
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};

    fn stored(body: &str) -> StoredResponse {
        StoredResponse::from_fetch(&FetchResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_string()),
            kind: ResponseKind::Basic,
        })
    }

    #[tokio::test]
    async fn test_bucket_get_returns_none_for_missing_key() {
        let bucket = Bucket::new("pages-cache-v1.0.0");
        assert!(bucket.get(&CacheKey::new("/missing")).await.is_none());
    }

    #[tokio::test]
    async fn test_bucket_put_and_get() {
        let bucket = Bucket::new("pages-cache-v1.0.0");
        let key = CacheKey::new("/profile");

        bucket.put(key.clone(), stored("profile page")).await.unwrap();

        let entry = bucket.get(&key).await.unwrap();
        assert_eq!(entry.body, Bytes::from("profile page"));
    }

    #[tokio::test]
    async fn test_bucket_put_overwrites_without_duplicating() {
        let bucket = Bucket::new("pages-cache-v1.0.0");
        let key = CacheKey::new("/profile");

        bucket.put(key.clone(), stored("first")).await.unwrap();
        bucket.put(key.clone(), stored("second")).await.unwrap();

        assert_eq!(bucket.entry_count().await, 1);
        assert_eq!(bucket.get(&key).await.unwrap().body, Bytes::from("second"));
    }

    #[tokio::test]
    async fn test_bucket_rejects_oversized_entries() {
        let bucket = Bucket::new("dynamic-cache-v1.0.0");
        let huge = StoredResponse::from_fetch(&FetchResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from(vec![0u8; 11 * 1024 * 1024]),
            kind: ResponseKind::Basic,
        });

        let result = bucket.put(CacheKey::new("/huge.bin"), huge).await;
        assert!(matches!(result, Err(CacheError::EntryTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_bucket_remove() {
        let bucket = Bucket::new("static-cache-v1.0.0");
        let key = CacheKey::new("/app.js");

        bucket.put(key.clone(), stored("console.log(1)")).await.unwrap();
        bucket.remove(&key).await;

        assert!(!bucket.contains(&key).await);
    }
}
