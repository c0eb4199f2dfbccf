//! Cache controller
//!
//! Owns the write side of the cache: installation pre-caching,
//! activation and old-version cleanup, explicit route caching commands,
//! and the bulk cache job with its progress reporting. Commands arrive
//! over a channel; progress and lifecycle changes fan out as broadcast
//! events.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::{Bucket, BucketKind, BucketSet, CacheKey, StoredResponse};
use crate::config::Config;
use crate::constants::{BULK_PROGRESS_BASE, BULK_PROGRESS_CAP};
use crate::error::ServiceError;
use crate::lifecycle::{Lifecycle, State};
use crate::net::{CorsMode, FetchRequest, Fetcher, ResponseKind};
use crate::store::DurableStore;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Commands accepted by the controller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Command {
    /// Cache a single route into the pages bucket
    #[serde(rename = "CACHE_NEW_ROUTE")]
    CacheNewRoute { route: String },

    /// Run a bulk cache job; an empty route list means the configured
    /// default set
    #[serde(rename = "CACHE_ALL_ROUTES")]
    CacheAllRoutes {
        #[serde(default)]
        routes: Vec<String>,
    },

    /// Activate immediately instead of waiting for release
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
}

/// Events broadcast by the controller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "CACHE_STARTED")]
    CacheStarted {
        job_id: String,
        total: usize,
        message: String,
    },

    #[serde(rename = "CACHE_PROGRESS")]
    CacheProgress {
        job_id: String,
        progress: u8,
        route: String,
    },

    #[serde(rename = "CACHE_COMPLETE")]
    CacheComplete {
        job_id: String,
        cached: usize,
        failed: usize,
        message: String,
    },

    #[serde(rename = "CACHE_ERROR")]
    CacheError { job_id: String, message: String },

    #[serde(rename = "SW_ACTIVATED")]
    Activated { version: String },

    #[serde(rename = "ROUTE_CACHING_REQUESTED")]
    RouteCachingRequested { route: String, success: bool },
}

/// Outcome of one bulk cache job
#[derive(Debug, Clone, PartialEq)]
pub struct BulkReport {
    pub job_id: String,
    pub total: usize,
    pub cached: usize,
    pub failed: usize,
}

/// Outcome of installation pre-caching
#[derive(Debug, Clone, PartialEq)]
pub struct InstallReport {
    pub cached: usize,
    pub placeholders: usize,
}

/// Drives installation, activation and explicit caching commands
///
/// Cheap to clone; the command loop and callers share one instance.
#[derive(Clone)]
pub struct CacheController {
    store: DurableStore,
    buckets: BucketSet,
    fetcher: Arc<dyn Fetcher>,
    config: Arc<Config>,
    events: broadcast::Sender<Event>,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl CacheController {
    pub fn new(
        store: DurableStore,
        buckets: BucketSet,
        fetcher: Arc<dyn Fetcher>,
        config: Arc<Config>,
        lifecycle: Arc<Mutex<Lifecycle>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            buckets,
            fetcher,
            config,
            events,
            lifecycle,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn emit(&self, event: Event) {
        // A send error just means nobody is listening right now
        let _ = self.events.send(event);
    }

    /// Pre-cache critical pages and assets, then park or activate
    ///
    /// Individual fetch failures do not fail installation; the affected
    /// URL gets a placeholder entry so later lookups still resolve.
    pub async fn install(&self) -> Result<InstallReport, ServiceError> {
        info!(version = %self.config.version, "installing");

        let mut report = InstallReport {
            cached: 0,
            placeholders: 0,
        };

        for page in &self.config.critical_pages {
            self.precache(page, BucketKind::Pages, &mut report).await;
        }
        for asset in &self.config.precache_assets {
            self.precache(asset, BucketKind::Static, &mut report).await;
        }

        self.store
            .set_config("lastInstall", &serde_json::json!(chrono::Utc::now().to_rfc3339()))?;

        let skip = self.lifecycle.lock().skip_waiting_requested();
        if skip {
            self.activate().await?;
        } else {
            self.lifecycle.lock().transition(State::WaitingToActivate)?;
        }

        info!(
            cached = report.cached,
            placeholders = report.placeholders,
            "installation complete"
        );
        Ok(report)
    }

    /// Pre-cache one URL; any failure degrades to a placeholder entry
    /// and never aborts installation
    async fn precache(&self, url: &str, kind: BucketKind, report: &mut InstallReport) {
        let key = CacheKey::new(url);
        let bucket = self.buckets.open(kind);

        match self.fetcher.fetch(&FetchRequest::get(url)).await {
            Ok(response) if response.is_ok() => {
                if let Err(err) = bucket
                    .put(key.clone(), StoredResponse::from_fetch(&response))
                    .await
                {
                    warn!(url, error = %err, "precache cache write failed");
                    self.put_placeholder(&bucket, key, report).await;
                    return;
                }
                if let Err(err) = self.store.record_cached(key.as_str(), bucket.name()) {
                    warn!(url, error = %err, "precache metadata write failed");
                }
                report.cached += 1;
            }
            Ok(response) => {
                warn!(url, status = %response.status, "precache got a failure status");
                self.put_placeholder(&bucket, key, report).await;
            }
            Err(err) => {
                warn!(url, error = %err, "precache fetch failed");
                self.put_placeholder(&bucket, key, report).await;
            }
        }
    }

    async fn put_placeholder(&self, bucket: &Bucket, key: CacheKey, report: &mut InstallReport) {
        if let Err(err) = bucket.put(key, placeholder_entry()).await {
            warn!(bucket = bucket.name(), error = %err, "placeholder write failed");
        }
        report.placeholders += 1;
    }

    /// Take over request interception
    ///
    /// Deletes buckets from other versions first, unless the persistent
    /// variant is configured.
    pub async fn activate(&self) -> Result<(), ServiceError> {
        if !self.config.persistent {
            let removed = self.buckets.delete_mismatched();
            if removed > 0 {
                info!(removed, "deleted old-version buckets");
            }
        }

        self.store
            .set_config("cacheVersion", &serde_json::json!(self.config.version))?;
        self.lifecycle.lock().transition(State::Active)?;
        self.emit(Event::Activated {
            version: self.config.version.clone(),
        });
        info!(version = %self.config.version, "active");
        Ok(())
    }

    /// Handle a skip-waiting request; a parked instance activates now
    pub async fn skip_waiting(&self) -> Result<(), ServiceError> {
        let parked = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.request_skip_waiting();
            lifecycle.state() == State::WaitingToActivate
        };

        if parked {
            self.activate().await?;
        }
        Ok(())
    }

    /// Hand off to a newer instance
    pub fn supersede(&self) -> Result<(), ServiceError> {
        self.lifecycle.lock().transition(State::Superseded)?;
        info!("superseded");
        Ok(())
    }

    /// Cache one route into the pages bucket, reporting the outcome
    ///
    /// Fetched without CORS so opaque cross-origin responses still count
    /// as cacheable successes.
    pub async fn cache_route(&self, route: &str) -> Result<(), ServiceError> {
        let result = self.try_cache_route(route).await;
        self.emit(Event::RouteCachingRequested {
            route: route.to_string(),
            success: result.is_ok(),
        });
        result
    }

    async fn try_cache_route(&self, route: &str) -> Result<(), ServiceError> {
        let response = self
            .fetcher
            .fetch(&FetchRequest::get(route).with_mode(CorsMode::NoCors))
            .await?;

        if !response.is_ok() && response.kind != ResponseKind::Opaque {
            warn!(route, status = %response.status, "route fetch failed, not caching");
            return Err(crate::cache::CacheError::UncacheableStatus(response.status).into());
        }

        let key = CacheKey::new(route);
        let bucket = self.buckets.open(BucketKind::Pages);
        bucket
            .put(key.clone(), StoredResponse::from_fetch(&response))
            .await?;
        self.store.record_cached(key.as_str(), bucket.name())?;
        info!(route, "route cached");
        Ok(())
    }

    /// Run a bulk cache job over the given routes
    ///
    /// Routes are fetched sequentially with a pacing delay between
    /// them. Individual failures are counted but do not stop the job.
    /// Progress events scale from the base floor to the cap and only
    /// the final route reports 100.
    pub async fn cache_all_routes(&self, routes: Vec<String>) -> BulkReport {
        let routes = if routes.is_empty() {
            self.config.default_routes.clone()
        } else {
            routes
        };

        let job_id = Uuid::new_v4().to_string();
        let total = routes.len();

        if total == 0 {
            self.emit(Event::CacheError {
                job_id: job_id.clone(),
                message: "no routes to cache".to_string(),
            });
            return BulkReport {
                job_id,
                total: 0,
                cached: 0,
                failed: 0,
            };
        }

        info!(job_id = %job_id, total, "bulk cache job started");
        self.emit(Event::CacheStarted {
            job_id: job_id.clone(),
            total,
            message: format!("Caching {} routes for offline use", total),
        });

        let mut cached = 0;
        let mut failed = 0;

        for (index, route) in routes.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.bulk_delay()).await;
            }

            match self.cache_route(route).await {
                Ok(()) => cached += 1,
                Err(err) => {
                    error!(route = %route, error = %err, "bulk cache route failed");
                    failed += 1;
                }
            }

            let completed = index + 1;
            self.emit(Event::CacheProgress {
                job_id: job_id.clone(),
                progress: bulk_progress(completed, total),
                route: route.clone(),
            });
        }

        if let Err(err) = self
            .store
            .set_config("offlineModeEnabled", &serde_json::json!(true))
        {
            warn!(error = %err, "could not record offline mode flag");
        }

        self.emit(Event::CacheComplete {
            job_id: job_id.clone(),
            cached,
            failed,
            message: format!("Cached {} of {} routes", cached, total),
        });
        info!(job_id = %job_id, cached, failed, "bulk cache job complete");

        BulkReport {
            job_id,
            total,
            cached,
            failed,
        }
    }

    /// Command loop; runs until the channel closes
    pub async fn serve(self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::CacheNewRoute { route } => {
                    if let Err(err) = self.cache_route(&route).await {
                        error!(route = %route, error = %err, "route caching failed");
                    }
                }
                Command::CacheAllRoutes { routes } => {
                    self.cache_all_routes(routes).await;
                }
                Command::SkipWaiting => {
                    if let Err(err) = self.skip_waiting().await {
                        error!(error = %err, "skip waiting failed");
                    }
                }
            }
        }
    }
}

/// Progress percentage after `completed` of `total` routes
///
/// Scales linearly from the base floor, capped below 100 until the
/// final route lands.
pub fn bulk_progress(completed: usize, total: usize) -> u8 {
    if completed >= total {
        return 100;
    }
    let scaled = BULK_PROGRESS_BASE as usize + (90 * completed) / total;
    (scaled as u8).min(BULK_PROGRESS_CAP)
}

/// Wait for a bulk job to finish, assuming success if no completion
/// event arrives within the timeout
pub async fn await_completion(
    events: &mut broadcast::Receiver<Event>,
    job_id: &str,
    timeout: std::time::Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let event = match tokio::time::timeout_at(deadline, events.recv()).await {
            // No completion in time: the job is assumed to have finished
            Err(_elapsed) => return true,
            Ok(Err(_closed)) => return true,
            Ok(Ok(event)) => event,
        };

        match event {
            Event::CacheComplete { job_id: id, .. } if id == job_id => return true,
            Event::CacheError { job_id: id, .. } if id == job_id => return false,
            _ => {}
        }
    }
}

fn placeholder_entry() -> StoredResponse {
    StoredResponse::from_fetch(&crate::net::FetchResponse {
        status: StatusCode::SERVICE_UNAVAILABLE,
        headers: HeaderMap::new(),
        body: Bytes::from_static(b"Unavailable at install"),
        kind: ResponseKind::Basic,
    })
}
