//! Reconnection synchronizer
//!
//! Replays writes that were queued while the device was offline. The
//! watcher task observes the connectivity signal and triggers a replay
//! on every offline-to-online transition; replays can also be invoked
//! directly.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::ServiceError;
use crate::net::{Connectivity, CorsMode, FetchRequest, Fetcher};
use crate::store::{DurableStore, PendingMutation};

/// Outcome of one replay pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    pub attempted: usize,
    pub replayed: usize,
    pub failed: usize,
}

/// Replays queued mutations once connectivity returns
#[derive(Clone)]
pub struct Synchronizer {
    store: DurableStore,
    fetcher: Arc<dyn Fetcher>,
}

impl Synchronizer {
    pub fn new(store: DurableStore, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { store, fetcher }
    }

    /// Replay all pending mutations in creation order
    ///
    /// Each mutation is delivered exactly as queued. A successful
    /// delivery marks it synced; a failed one stays queued for the next
    /// pass. One failure never blocks the rest of the queue.
    pub async fn replay_pending(&self) -> Result<ReplayReport, ServiceError> {
        let pending = self.store.pending_mutations()?;
        let mut report = ReplayReport {
            attempted: pending.len(),
            replayed: 0,
            failed: 0,
        };

        if pending.is_empty() {
            return Ok(report);
        }

        info!(count = pending.len(), "replaying queued mutations");

        for mutation in pending {
            match self.replay_one(&mutation).await {
                Ok(()) => {
                    self.store.mark_synced(mutation.id)?;
                    report.replayed += 1;
                }
                Err(err) => {
                    warn!(
                        id = mutation.id,
                        route = %mutation.route,
                        error = %err,
                        "replay failed, mutation stays queued"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            replayed = report.replayed,
            failed = report.failed,
            "replay pass complete"
        );
        Ok(report)
    }

    async fn replay_one(&self, mutation: &PendingMutation) -> Result<(), ServiceError> {
        let method = Method::from_bytes(mutation.method.as_bytes()).map_err(|_| {
            ServiceError::Config(format!("queued mutation has bad method {:?}", mutation.method))
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &mutation.headers {
            if let (Ok(name), Ok(value)) = (
                http::header::HeaderName::from_bytes(name.as_bytes()),
                http::HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }

        let request = FetchRequest {
            method,
            url: mutation.route.clone(),
            headers,
            body: Some(Bytes::from(mutation.body.clone())),
            mode: CorsMode::SameOrigin,
        };

        let response = self.fetcher.fetch(&request).await?;
        if !response.is_ok() {
            return Err(ServiceError::Config(format!(
                "replay of {} got status {}",
                mutation.route, response.status
            )));
        }
        Ok(())
    }

    /// Spawn the watcher task; replays on every offline-to-online
    /// transition until the connectivity signal is dropped
    pub fn spawn_watcher(&self, connectivity: &Connectivity) -> JoinHandle<()> {
        let synchronizer = self.clone();
        let mut rx = connectivity.subscribe();

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if !online {
                    continue;
                }
                info!("connectivity restored");
                if let Err(err) = synchronizer.replay_pending().await {
                    warn!(error = %err, "replay pass aborted");
                }
            }
        })
    }
}
