// Configuration module

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_API_PREFIX, DEFAULT_BULK_DELAY_MS, DEFAULT_CACHE_VERSION, DEFAULT_FETCH_TIMEOUT_SECS,
    DEFAULT_ROUTES, DEFAULT_STALENESS_DAYS, CRITICAL_PAGES, EXCLUDED_HOSTS, PRECACHE_ASSETS,
};
use crate::error::ServiceError;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Structural cache version tag; buckets are named after it
    #[serde(default = "default_version")]
    pub version: String,

    /// Retain buckets from previous versions on activation instead of
    /// deleting them (total-availability variant, costs storage growth)
    #[serde(default)]
    pub persistent: bool,

    /// Age in days past which a cache-first hit triggers a background refresh
    #[serde(default = "default_staleness_days")]
    pub staleness_threshold_days: u64,

    /// Delay in milliseconds between consecutive routes of a bulk cache job
    #[serde(default = "default_bulk_delay_ms")]
    pub bulk_delay_ms: u64,

    /// Route set cached by a CACHE_ALL_ROUTES command that names no routes
    #[serde(default = "default_routes")]
    pub default_routes: Vec<String>,

    /// Pages pre-cached first during installation
    #[serde(default = "default_critical_pages")]
    pub critical_pages: Vec<String>,

    /// Static assets pre-cached during installation
    #[serde(default = "default_precache_assets")]
    pub precache_assets: Vec<String>,

    /// Hosts that are never intercepted or cached
    #[serde(default = "default_excluded_hosts")]
    pub excluded_hosts: Vec<String>,

    /// Path prefix identifying internal API-like routes
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Location of the durable sqlite store
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Network fetch timeout in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Origin of the application itself; requests elsewhere are cross-origin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

fn default_version() -> String {
    DEFAULT_CACHE_VERSION.to_string()
}

fn default_staleness_days() -> u64 {
    DEFAULT_STALENESS_DAYS
}

fn default_bulk_delay_ms() -> u64 {
    DEFAULT_BULK_DELAY_MS
}

fn default_routes() -> Vec<String> {
    DEFAULT_ROUTES.iter().map(|s| s.to_string()).collect()
}

fn default_critical_pages() -> Vec<String> {
    CRITICAL_PAGES.iter().map(|s| s.to_string()).collect()
}

fn default_precache_assets() -> Vec<String> {
    PRECACHE_ASSETS.iter().map(|s| s.to_string()).collect()
}

fn default_excluded_hosts() -> Vec<String> {
    EXCLUDED_HOSTS.iter().map(|s| s.to_string()).collect()
}

fn default_api_prefix() -> String {
    DEFAULT_API_PREFIX.to_string()
}

fn default_store_path() -> String {
    "vitacache.db".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            persistent: false,
            staleness_threshold_days: default_staleness_days(),
            bulk_delay_ms: default_bulk_delay_ms(),
            default_routes: default_routes(),
            critical_pages: default_critical_pages(),
            precache_assets: default_precache_assets(),
            excluded_hosts: default_excluded_hosts(),
            api_prefix: default_api_prefix(),
            store_path: default_store_path(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            origin: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ServiceError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::Config(format!("cannot read {}: {}", path.display(), e)))?;

        let config: Config = serde_yaml::from_str(&contents)
            .map_err(|e| ServiceError::Config(format!("invalid YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.version.is_empty() {
            return Err(ServiceError::Config("version cannot be empty".to_string()));
        }

        if self.staleness_threshold_days == 0 {
            return Err(ServiceError::Config(
                "staleness_threshold_days must be at least 1".to_string(),
            ));
        }

        if !self.api_prefix.starts_with('/') {
            return Err(ServiceError::Config(format!(
                "api_prefix must start with '/', got {:?}",
                self.api_prefix
            )));
        }

        if self.store_path.is_empty() {
            return Err(ServiceError::Config(
                "store_path cannot be empty".to_string(),
            ));
        }

        if let Some(origin) = &self.origin {
            let parsed = url::Url::parse(origin)
                .map_err(|e| ServiceError::Config(format!("invalid origin {:?}: {}", origin, e)))?;
            if parsed.host_str().is_none() {
                return Err(ServiceError::Config(format!(
                    "origin {:?} has no host",
                    origin
                )));
            }
        }

        Ok(())
    }

    /// Staleness threshold as a chrono duration
    pub fn staleness_threshold(&self) -> chrono::Duration {
        chrono::Duration::days(self.staleness_threshold_days as i64)
    }

    /// Inter-item delay for bulk cache jobs
    pub fn bulk_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.bulk_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.version, "1.0.0");
        assert_eq!(config.staleness_threshold_days, 7);
        assert_eq!(config.bulk_delay_ms, 300);
        assert!(!config.persistent);
    }

    #[test]
    fn test_can_deserialize_minimal_config_from_yaml() {
        let yaml = r#"
version: "2.0.0"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.version, "2.0.0");
        // Everything else falls back to defaults
        assert_eq!(config.api_prefix, "/api/");
        assert!(!config.default_routes.is_empty());
    }

    #[test]
    fn test_can_parse_persistent_variant() {
        let yaml = r#"
persistent: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.persistent);
    }

    #[test]
    fn test_rejects_empty_version() {
        let config = Config {
            version: String::new(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_staleness_threshold() {
        let config = Config {
            staleness_threshold_days: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_api_prefix_without_leading_slash() {
        let config = Config {
            api_prefix: "api/".to_string(),
            ..Config::default()
        };
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("api_prefix"));
    }

    #[test]
    fn test_rejects_malformed_origin() {
        let config = Config {
            origin: Some("not a url".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_accepts_valid_origin() {
        let config = Config {
            origin: Some("http://localhost:3000".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_staleness_threshold_converts_to_duration() {
        let config = Config::default();
        assert_eq!(config.staleness_threshold(), chrono::Duration::days(7));
    }

    #[test]
    fn test_default_routes_include_root() {
        let config = Config::default();
        assert!(config.default_routes.iter().any(|r| r == "/"));
    }
}
