// Cache module

pub mod bucket;
pub mod buckets;
pub mod entry;
pub mod error;

pub use bucket::Bucket;
pub use buckets::BucketSet;
pub use entry::{CacheKey, StoredResponse};
pub use error::CacheError;

/// The three independently-lifecycled cache partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKind {
    /// Immutable static assets (scripts, styles, images, fonts)
    Static,
    /// Dynamic and API-like responses
    Dynamic,
    /// HTML page documents
    Pages,
}

impl BucketKind {
    /// All kinds in lookup-precedence order
    pub const ALL: &'static [Self] = &[Self::Static, Self::Dynamic, Self::Pages];

    pub fn prefix(&self) -> &'static str {
        match self {
            BucketKind::Static => "static",
            BucketKind::Dynamic => "dynamic",
            BucketKind::Pages => "pages",
        }
    }

    /// Versioned bucket name, e.g. `static-cache-v1.0.0`
    pub fn bucket_name(&self, version: &str) -> String {
        format!("{}-cache-v{}", self.prefix(), version)
    }
}

/// Extract the version tag from a versioned bucket name
pub fn version_of(bucket_name: &str) -> Option<&str> {
    bucket_name
        .rsplit_once("-v")
        .map(|(_, version)| version)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_kind_names_follow_version() {
        assert_eq!(BucketKind::Static.bucket_name("1.0.0"), "static-cache-v1.0.0");
        assert_eq!(BucketKind::Dynamic.bucket_name("1.0.0"), "dynamic-cache-v1.0.0");
        assert_eq!(BucketKind::Pages.bucket_name("2.1.0"), "pages-cache-v2.1.0");
    }

    #[test]
    fn test_version_of_parses_bucket_names() {
        assert_eq!(version_of("static-cache-v1.0.0"), Some("1.0.0"));
        assert_eq!(version_of("pages-cache-v2.0.0-beta"), Some("2.0.0-beta"));
        assert_eq!(version_of("unversioned"), None);
        assert_eq!(version_of("trailing-v"), None);
    }

    #[test]
    fn test_all_kinds_are_distinct() {
        let names: Vec<String> = BucketKind::ALL
            .iter()
            .map(|k| k.bucket_name("1.0.0"))
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| version_of(n) == Some("1.0.0")));
    }
}
