//! End-to-end offline flow: install, serve while online, degrade while
//! offline, queue writes, replay on reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use parking_lot::Mutex;

use vitacache::cache::BucketSet;
use vitacache::config::Config;
use vitacache::controller::CacheController;
use vitacache::interceptor::{Interceptor, Outcome, Request};
use vitacache::lifecycle::Lifecycle;
use vitacache::net::{Connectivity, FetchError, FetchRequest, FetchResponse, Fetcher, ResponseKind};
use vitacache::store::DurableStore;
use vitacache::strategy::StrategyEngine;
use vitacache::sync::Synchronizer;

/// Scripted application server: shares the connectivity signal with the
/// rest of the system and records every mutation it receives
struct FakeOrigin {
    connectivity: Connectivity,
    routes: Mutex<HashMap<String, String>>,
    mutations_received: Mutex<Vec<(String, Vec<u8>)>>,
    accept_mutations: AtomicBool,
}

impl FakeOrigin {
    fn new(connectivity: Connectivity) -> Self {
        Self {
            connectivity,
            routes: Mutex::new(HashMap::new()),
            mutations_received: Mutex::new(Vec::new()),
            accept_mutations: AtomicBool::new(true),
        }
    }

    fn serve(&self, url: &str, body: &str) {
        self.routes.lock().insert(url.to_string(), body.to_string());
    }
}

#[async_trait]
impl Fetcher for FakeOrigin {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        if !self.connectivity.is_online() {
            return Err(FetchError::Offline);
        }

        if request.method != Method::GET {
            self.mutations_received.lock().push((
                request.url.clone(),
                request.body.as_ref().map(|b| b.to_vec()).unwrap_or_default(),
            ));
            let status = if self.accept_mutations.load(Ordering::SeqCst) {
                StatusCode::CREATED
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            return Ok(FetchResponse {
                status,
                headers: HeaderMap::new(),
                body: Bytes::new(),
                kind: ResponseKind::Basic,
            });
        }

        match self.routes.lock().get(&request.url) {
            Some(body) => Ok(FetchResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Bytes::from(body.clone()),
                kind: ResponseKind::Basic,
            }),
            None => Ok(FetchResponse {
                status: StatusCode::NOT_FOUND,
                headers: HeaderMap::new(),
                body: Bytes::new(),
                kind: ResponseKind::Basic,
            }),
        }
    }

    fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }
}

struct System {
    connectivity: Connectivity,
    origin: Arc<FakeOrigin>,
    store: DurableStore,
    buckets: BucketSet,
    controller: CacheController,
    interceptor: Interceptor,
    synchronizer: Synchronizer,
}

fn build_system() -> System {
    let config = Config {
        bulk_delay_ms: 0,
        ..Config::default()
    };

    let connectivity = Connectivity::new(true);
    let origin = Arc::new(FakeOrigin::new(connectivity.clone()));
    for page in config.critical_pages.iter().chain(&config.precache_assets) {
        origin.serve(page, "precached");
    }

    let fetcher: Arc<dyn Fetcher> = origin.clone();
    let store = DurableStore::open_in_memory().unwrap();
    let buckets = BucketSet::new(config.version.clone());
    let lifecycle = Arc::new(Mutex::new(Lifecycle::new()));
    let config = Arc::new(config);

    let controller = CacheController::new(
        store.clone(),
        buckets.clone(),
        fetcher.clone(),
        config.clone(),
        lifecycle.clone(),
    );

    let engine = StrategyEngine::new(
        store.clone(),
        buckets.clone(),
        fetcher.clone(),
        config.staleness_threshold(),
    );
    let interceptor = Interceptor::new(
        engine,
        store.clone(),
        fetcher.clone(),
        lifecycle,
        &config,
    )
    .unwrap();

    let synchronizer = Synchronizer::new(store.clone(), fetcher);

    System {
        connectivity,
        origin,
        store,
        buckets,
        controller,
        interceptor,
        synchronizer,
    }
}

fn respond(outcome: Outcome) -> FetchResponse {
    match outcome {
        Outcome::Respond(response) => response,
        Outcome::Passthrough => panic!("expected an intercepted response"),
    }
}

#[tokio::test]
async fn test_full_offline_cycle() {
    let system = build_system();

    // Install and activate
    let report = system.controller.install().await.unwrap();
    assert_eq!(report.placeholders, 0);
    system.controller.activate().await.unwrap();

    // A page visited online lands in the pages bucket
    system.origin.serve("/education", "<html>education</html>");
    let response = respond(
        system
            .interceptor
            .handle(&Request::navigation("/education"))
            .await,
    );
    assert_eq!(response.status, StatusCode::OK);

    // Connection drops
    system.connectivity.set_online(false);

    // Visited and pre-cached pages still resolve
    let response = respond(
        system
            .interceptor
            .handle(&Request::navigation("/education"))
            .await,
    );
    assert_eq!(response.body, Bytes::from("<html>education</html>"));

    let response = respond(
        system
            .interceptor
            .handle(&Request::navigation("/profile"))
            .await,
    );
    assert_eq!(response.body, Bytes::from("precached"));

    // A never-visited page degrades to the offline document
    let response = respond(
        system
            .interceptor
            .handle(&Request::navigation("/never-visited"))
            .await,
    );
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(String::from_utf8_lossy(&response.body).contains("offline"));

    // An offline write is queued and acknowledged
    let mut post = Request::get("/api/measurements");
    post.method = Method::POST;
    post.body = Some(Bytes::from(r#"{"systolic":120,"diastolic":80}"#));
    let response = respond(system.interceptor.handle(&post).await);
    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(system.store.pending_mutations().unwrap().len(), 1);

    // Nothing reached the origin while offline
    assert!(system.origin.mutations_received.lock().is_empty());

    // Connection returns; the watcher replays the queued write
    let watcher = system.synchronizer.spawn_watcher(&system.connectivity);
    system.connectivity.set_online(true);

    for _ in 0..100 {
        if system.store.pending_mutations().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    watcher.abort();

    assert!(system.store.pending_mutations().unwrap().is_empty());
    let delivered = system.origin.mutations_received.lock();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "/api/measurements");
    assert_eq!(
        delivered[0].1,
        br#"{"systolic":120,"diastolic":80}"#.to_vec()
    );
}

#[tokio::test]
async fn test_bulk_job_makes_routes_available_offline() {
    let system = build_system();
    system.controller.install().await.unwrap();
    system.controller.activate().await.unwrap();

    for route in ["/", "/profile", "/measurements", "/medications", "/education"] {
        system.origin.serve(route, "page");
    }

    let report = system.controller.cache_all_routes(vec![]).await;
    assert_eq!(report.failed, 0);
    assert!(report.cached >= 5);

    system.connectivity.set_online(true);
    assert_eq!(
        system.store.get_config("offlineModeEnabled").unwrap(),
        Some(serde_json::json!(true))
    );

    system.connectivity.set_online(false);
    for route in ["/", "/education"] {
        let response = respond(
            system
                .interceptor
                .handle(&Request::navigation(route))
                .await,
        );
        assert_eq!(response.status, StatusCode::OK, "{} should be served", route);
    }
}

#[tokio::test]
async fn test_rejected_replay_stays_queued_for_next_reconnect() {
    let system = build_system();
    system.controller.install().await.unwrap();
    system.controller.activate().await.unwrap();

    system.connectivity.set_online(false);
    let mut post = Request::get("/api/measurements");
    post.method = Method::POST;
    post.body = Some(Bytes::from("{}"));
    respond(system.interceptor.handle(&post).await);

    // The origin refuses the replay this time
    system.origin.accept_mutations.store(false, Ordering::SeqCst);
    system.connectivity.set_online(true);

    let report = system.synchronizer.replay_pending().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(system.store.pending_mutations().unwrap().len(), 1);

    // Next pass succeeds once the origin recovers
    system.origin.accept_mutations.store(true, Ordering::SeqCst);
    let report = system.synchronizer.replay_pending().await.unwrap();
    assert_eq!(report.replayed, 1);
    assert!(system.store.pending_mutations().unwrap().is_empty());
}

#[tokio::test]
async fn test_old_version_buckets_are_dropped_on_activation() {
    let system = build_system();
    system
        .buckets
        .open_named("pages-cache-v0.9.0");

    system.controller.install().await.unwrap();
    system.controller.activate().await.unwrap();

    assert!(!system
        .buckets
        .bucket_names()
        .iter()
        .any(|name| name.contains("v0.9.0")));
}
