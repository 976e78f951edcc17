// src/health/checker.rs
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use crate::proxy::{Backend, BackendPool};

/// Liveness probe path, relative to each backend's origin.
const PROBE_PATH: &str = "/v1/models";

/// Minimum per-probe timeout, regardless of how short `interval` is
/// configured (spec.md §4.2: "capped to a sane minimum").
const MIN_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Periodically probes every backend's `/v1/models` and flips its health
/// flag on each individual outcome — no hysteresis, no consecutive-failure
/// threshold (spec.md §4.2 is explicit that a single probe decides).
pub struct HealthChecker {
    pool: Arc<BackendPool>,
    client: Client,
    interval: Duration,
    probe_timeout: Duration,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl HealthChecker {
    pub fn new(pool: Arc<BackendPool>, interval: Duration) -> Self {
        let probe_timeout = interval.max(MIN_PROBE_TIMEOUT);
        // A followed 3xx->2xx would mis-report a dead backend as live.
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build reqwest client");
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Self {
            pool,
            client,
            interval,
            probe_timeout,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Runs until `shutdown()` is called. Each tick probes every backend
    /// concurrently; the ticker only advances once the prior round has
    /// fully completed, so a slow round never overlaps the next (spec.md
    /// §4.2: "no overlap per backend; overall ticker does not pile up").
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.interval);
        // A round that overruns one interval (a slow/timing-out backend)
        // must not cause a burst of back-to-back ticks once it finishes.
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(interval = ?self.interval, "starting health checker");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all_backends().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn check_all_backends(&self) {
        let backends = self.pool.all().to_vec();
        let probes = backends
            .into_iter()
            .map(|backend| self.probe(backend));

        let results = futures::future::join_all(probes).await;

        let healthy = results.iter().filter(|r| *r).count();
        info!(
            healthy,
            total = results.len(),
            "health check round complete"
        );
    }

    /// Probe one backend and update its health flag. Returns the outcome
    /// for aggregate logging.
    async fn probe(&self, backend: Arc<Backend>) -> bool {
        let url = match backend.url.join(PROBE_PATH) {
            Ok(u) => u,
            Err(e) => {
                warn!(backend = %backend, error = %e, "could not build probe URL");
                self.pool.mark(&backend, false);
                return false;
            }
        };

        let outcome = timeout(self.probe_timeout, self.client.get(url).send()).await;

        let healthy = match outcome {
            Ok(Ok(response)) => response.status().is_success(),
            Ok(Err(e)) => {
                debug!(backend = %backend, error = %e, "probe request failed");
                false
            }
            Err(_) => {
                debug!(backend = %backend, "probe timed out");
                false
            }
        };

        if healthy != backend.is_healthy() {
            if healthy {
                info!(backend = %backend, "backend is now healthy");
            } else {
                warn!(backend = %backend, "backend is now unhealthy");
            }
        }

        self.pool.mark(&backend, healthy);
        healthy
    }
}
