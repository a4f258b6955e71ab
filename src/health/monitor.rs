//! Active health monitor.
//!
//! Periodically probes every registered backend and updates the registry's
//! healthy set. Probe failures never escape this module; they only show up
//! as a backend leaving the healthy set.

use crate::backend::{Backend, Registry};
use crate::metrics::MetricsCollector;
use crate::proxy::ForwardError;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

/// Liveness check against a single backend.
pub trait Prober: Send + Sync + 'static {
    /// Probe `backend`. Any error counts as a failed check.
    fn probe(&self, backend: &Backend) -> impl Future<Output = Result<(), ForwardError>> + Send;
}

/// Outcome of one round of probes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CheckSummary {
    /// Backends that passed.
    pub healthy: usize,
    /// Backends that failed or timed out.
    pub unhealthy: usize,
    /// Backends whose membership in the healthy set changed.
    pub transitions: usize,
}

/// Probes backends on a fixed interval.
pub struct HealthMonitor<P> {
    registry: Arc<Registry>,
    prober: P,
    interval: Duration,
    timeout: Duration,
    metrics: MetricsCollector,
}

impl<P: Prober> HealthMonitor<P> {
    /// Create a new health monitor.
    ///
    /// `probe_timeout` bounds each individual probe.
    pub fn new(
        registry: Arc<Registry>,
        prober: P,
        check_interval: Duration,
        probe_timeout: Duration,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            registry,
            prober,
            interval: check_interval,
            timeout: probe_timeout,
            metrics,
        }
    }

    /// Run the monitor until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval = ?self.interval,
            timeout = ?self.timeout,
            "health monitor starting"
        );

        let mut ticker = interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.check_all().await;
                    debug!(
                        healthy = summary.healthy,
                        unhealthy = summary.unhealthy,
                        transitions = summary.transitions,
                        "health check round completed"
                    );
                }

                _ = shutdown.recv() => {
                    info!("health monitor shutting down");
                    break;
                }
            }
        }
    }

    /// Probe every registered backend once and apply the results.
    ///
    /// Probes run concurrently and each is bounded by the probe timeout, so
    /// one slow or unreachable backend does not hold up the others.
    pub async fn check_all(&self) -> CheckSummary {
        let pool = self.registry.snapshot();

        let probes = pool.backends().iter().map(|backend| async move {
            let result = match timeout(self.timeout, self.prober.probe(backend)).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("probe timed out after {:?}", self.timeout)),
            };
            (backend, result)
        });

        let mut summary = CheckSummary::default();
        for (backend, result) in join_all(probes).await {
            self.apply(backend, result, &mut summary);
        }
        summary
    }

    fn apply(&self, backend: &Backend, result: Result<(), String>, summary: &mut CheckSummary) {
        let id = backend.id();
        let healthy = result.is_ok();

        match result {
            Ok(()) => {
                debug!(backend = %id, "health check passed");
                summary.healthy += 1;
                if self.registry.mark_healthy(id) {
                    info!(backend = %id, "backend marked healthy");
                    summary.transitions += 1;
                }
            }
            Err(e) => {
                warn!(backend = %id, error = %e, "health check failed");
                summary.unhealthy += 1;
                if self.registry.mark_unhealthy(id) {
                    warn!(backend = %id, "backend marked unhealthy");
                    summary.transitions += 1;
                }
            }
        }

        self.metrics.record_health_check(id, healthy);
        self.metrics.set_backend_health(id, healthy);
    }
}
