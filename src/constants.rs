// Constants module - centralized default values for configuration
//
// This module defines all default values used throughout the codebase.
// Using constants instead of magic numbers improves maintainability
// and makes it easier to understand and modify defaults.

// =============================================================================
// Cache version defaults
// =============================================================================

/// Default structural cache version tag
pub const DEFAULT_CACHE_VERSION: &str = "1.0.0";

// =============================================================================
// Staleness / refresh defaults
// =============================================================================

/// Age past which a cached entry is still served but scheduled for
/// background renewal (7 days)
pub const DEFAULT_STALENESS_DAYS: u64 = 7;

// =============================================================================
// Bulk cache job defaults
// =============================================================================

/// Delay between consecutive route fetches in a bulk cache job
pub const DEFAULT_BULK_DELAY_MS: u64 = 300;

/// How long a caller waits for a bulk job completion event before
/// assuming success
pub const DEFAULT_BULK_TIMEOUT_SECS: u64 = 10;

/// Progress floor emitted once a bulk job starts processing
pub const BULK_PROGRESS_BASE: u8 = 10;

/// Progress ceiling before the final route of a bulk job completes
pub const BULK_PROGRESS_CAP: u8 = 95;

// =============================================================================
// Network defaults
// =============================================================================

/// Default fetch timeout in seconds
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Path prefix identifying internal API-like routes
pub const DEFAULT_API_PREFIX: &str = "/api/";

// =============================================================================
// Request classification defaults
// =============================================================================

/// File extensions routed to the cache-first strategy
pub const ASSET_EXTENSION_PATTERN: &str =
    r"(?i)\.(js|css|png|jpg|jpeg|gif|svg|ico|woff2?|ttf|eot)$";

/// Font-hosting origins routed to the cache-first strategy
pub const FONT_HOSTS: &[&str] = &["fonts.googleapis.com", "fonts.gstatic.com"];

/// Hosts that must never be intercepted or cached
pub const EXCLUDED_HOSTS: &[&str] = &["chrome-devtools-frontend.appspot.com"];

/// Path prefixes that must never be intercepted or cached
pub const EXCLUDED_PATH_PREFIXES: &[&str] = &["/devtools/"];

// =============================================================================
// Fallback resources
// =============================================================================

/// Cached placeholder returned for images that cannot be fetched offline
pub const PLACEHOLDER_ICON: &str = "/icon.png";

/// Root document served as the navigation fallback of last resort
pub const ROOT_DOCUMENT: &str = "/";

// =============================================================================
// Default route sets
// =============================================================================

/// Top-level feature pages cached by a default bulk job
pub const DEFAULT_ROUTES: &[&str] = &[
    "/",
    "/profile",
    "/measurements",
    "/medications",
    "/education",
];

/// Pages pre-cached during installation before anything else
pub const CRITICAL_PAGES: &[&str] = &["/profile", "/measurements", "/medications"];

/// Static assets pre-cached during installation
pub const PRECACHE_ASSETS: &[&str] = &[
    "/manifest.webmanifest",
    "/apple-icon.png",
    "/icon.png",
    "/favicon.ico",
];
