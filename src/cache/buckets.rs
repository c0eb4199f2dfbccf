//! Bucket set - the full collection of live cache buckets
//!
//! Owns every bucket in the process, keyed by versioned name. Lookups
//! treat the set as one logical namespace (the original design matched
//! requests across all caches); writes address a specific bucket.
//! Version changes delete mismatched buckets wholesale unless the
//! persistent variant is configured.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::bucket::Bucket;
use super::entry::{CacheKey, StoredResponse};
use super::{version_of, BucketKind};

struct Inner {
    version: String,
    buckets: RwLock<HashMap<String, Bucket>>,
}

/// The full set of live cache buckets for the current version, plus any
/// retained buckets from earlier versions
#[derive(Clone)]
pub struct BucketSet {
    inner: Arc<Inner>,
}

impl BucketSet {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                version: version.into(),
                buckets: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn current_version(&self) -> &str {
        &self.inner.version
    }

    /// Bucket of the given kind for the current version, created on demand
    pub fn open(&self, kind: BucketKind) -> Bucket {
        self.open_named(&kind.bucket_name(&self.inner.version))
    }

    /// Bucket by full versioned name, created on demand
    pub fn open_named(&self, name: &str) -> Bucket {
        if let Some(bucket) = self.inner.buckets.read().get(name) {
            return bucket.clone();
        }

        let mut buckets = self.inner.buckets.write();
        buckets
            .entry(name.to_string())
            .or_insert_with(|| Bucket::new(name))
            .clone()
    }

    /// Names of all live buckets, sorted for deterministic iteration
    pub fn bucket_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.buckets.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Single-namespace lookup across every bucket
    ///
    /// Current-version buckets are consulted first in kind-precedence
    /// order, then any retained old-version buckets. Returns the entry
    /// together with the owning bucket's name.
    pub async fn match_any(&self, key: &CacheKey) -> Option<(StoredResponse, String)> {
        let current: Vec<String> = BucketKind::ALL
            .iter()
            .map(|kind| kind.bucket_name(&self.inner.version))
            .collect();

        for name in &current {
            if let Some(bucket) = self.lookup(name) {
                if let Some(entry) = bucket.get(key).await {
                    return Some((entry, name.clone()));
                }
            }
        }

        for name in self.bucket_names() {
            if current.contains(&name) {
                continue;
            }
            if let Some(bucket) = self.lookup(&name) {
                if let Some(entry) = bucket.get(key).await {
                    return Some((entry, name));
                }
            }
        }

        None
    }

    /// Delete every bucket whose version tag differs from the current
    /// version; returns the number of buckets removed
    ///
    /// Callers skip this entirely in the persistent variant.
    pub fn delete_mismatched(&self) -> usize {
        let mut buckets = self.inner.buckets.write();
        let before = buckets.len();
        buckets.retain(|name, _| version_of(name) == Some(self.inner.version.as_str()));
        before - buckets.len()
    }

    fn lookup(&self, name: &str) -> Option<Bucket> {
        self.inner.buckets.read().get(name).cloned()
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
    async fn test_open_creates_versioned_buckets_on_demand() {
        let set = BucketSet::new("1.0.0");
        let bucket = set.open(BucketKind::Pages);
        assert_eq!(bucket.name(), "pages-cache-v1.0.0");
        assert_eq!(set.bucket_names(), vec!["pages-cache-v1.0.0"]);
    }

    #[tokio::test]
    async fn test_open_returns_same_bucket_for_same_kind() {
        let set = BucketSet::new("1.0.0");
        let key = CacheKey::new("/profile");

        set.open(BucketKind::Pages)
            .put(key.clone(), stored("page"))
            .await
            .unwrap();

        assert!(set.open(BucketKind::Pages).contains(&key).await);
    }

    #[tokio::test]
    async fn test_match_any_finds_entry_in_any_bucket() {
        let set = BucketSet::new("1.0.0");
        let key = CacheKey::new("/app.css");

        set.open(BucketKind::Dynamic)
            .put(key.clone(), stored("css"))
            .await
            .unwrap();

        let (entry, owner) = set.match_any(&key).await.unwrap();
        assert_eq!(entry.body, Bytes::from("css"));
        assert_eq!(owner, "dynamic-cache-v1.0.0");
    }

    #[tokio::test]
    async fn test_match_any_prefers_current_version() {
        let set = BucketSet::new("2.0.0");
        let key = CacheKey::new("/");

        set.open_named("pages-cache-v1.0.0")
            .put(key.clone(), stored("old"))
            .await
            .unwrap();
        set.open(BucketKind::Pages)
            .put(key.clone(), stored("new"))
            .await
            .unwrap();

        let (entry, owner) = set.match_any(&key).await.unwrap();
        assert_eq!(entry.body, Bytes::from("new"));
        assert_eq!(owner, "pages-cache-v2.0.0");
    }

    #[tokio::test]
    async fn test_match_any_falls_back_to_retained_old_buckets() {
        let set = BucketSet::new("2.0.0");
        let key = CacheKey::new("/legacy");

        set.open_named("pages-cache-v1.0.0")
            .put(key.clone(), stored("legacy"))
            .await
            .unwrap();

        let (_, owner) = set.match_any(&key).await.unwrap();
        assert_eq!(owner, "pages-cache-v1.0.0");
    }

    #[tokio::test]
    async fn test_delete_mismatched_removes_old_versions() {
        let set = BucketSet::new("2.0.0");
        set.open(BucketKind::Pages);
        set.open_named("pages-cache-v1.0.0");
        set.open_named("static-cache-v1.0.0");

        let removed = set.delete_mismatched();
        assert_eq!(removed, 2);
        assert_eq!(set.bucket_names(), vec!["pages-cache-v2.0.0"]);
    }

    #[tokio::test]
    async fn test_persistent_variant_retains_old_buckets_when_not_deleted() {
        let set = BucketSet::new("2.0.0");
        let key = CacheKey::new("/");
        set.open_named("pages-cache-v1.0.0")
            .put(key.clone(), stored("old"))
            .await
            .unwrap();

        // Persistent variant: delete_mismatched is never invoked
        assert!(set.match_any(&key).await.is_some());
        assert_eq!(set.bucket_names().len(), 1);
    }
}
