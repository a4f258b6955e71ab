//! Metrics collector using prometheus-client.
//!
//! Provides metrics for dispatched requests, forwarding failures, client
//! connections, and backend health.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Labels for request metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub backend: String,
    pub status: String,
}

/// Labels for per-backend metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabels {
    pub backend: String,
}

/// Labels for health check metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HealthCheckLabels {
    pub backend: String,
    pub result: HealthCheckResult,
}

/// Result of a health check.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum HealthCheckResult {
    Success,
    Failure,
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    /// Requests answered by a backend.
    requests_total: Family<RequestLabels, Counter>,
    /// Request duration histogram (in seconds).
    request_duration_seconds: Family<BackendLabels, Histogram>,
    /// Requests that failed while being forwarded.
    forward_failures_total: Family<BackendLabels, Counter>,
    /// Requests rejected because no backend was available.
    unavailable_total: Counter,
    /// Backend health gauge (1 = healthy, 0 = unhealthy).
    backend_health: Family<BackendLabels, Gauge>,
    /// Health check results counter.
    health_checks_total: Family<HealthCheckLabels, Counter>,
    /// Number of registered backends.
    backends_registered: Gauge,
    /// Open client connections.
    active_connections: Gauge,
    /// Accepted client connections.
    connections_total: Counter,
    /// The prometheus registry.
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::<RequestLabels, Counter>::default();
        let request_duration_seconds =
            Family::<BackendLabels, Histogram>::new_with_constructor(|| {
                // Buckets: 1ms up to roughly 10s
                Histogram::new(exponential_buckets(0.001, 2.5, 13))
            });
        let forward_failures_total = Family::<BackendLabels, Counter>::default();
        let unavailable_total = Counter::default();
        let backend_health = Family::<BackendLabels, Gauge>::default();
        let health_checks_total = Family::<HealthCheckLabels, Counter>::default();
        let backends_registered = Gauge::default();
        let active_connections = Gauge::default();
        let connections_total = Counter::default();

        registry.register(
            "dispatchlb_requests",
            "Total number of requests answered by a backend",
            requests_total.clone(),
        );
        registry.register(
            "dispatchlb_request_duration_seconds",
            "Request duration in seconds",
            request_duration_seconds.clone(),
        );
        registry.register(
            "dispatchlb_forward_failures",
            "Total number of requests that failed while being forwarded",
            forward_failures_total.clone(),
        );
        registry.register(
            "dispatchlb_unavailable",
            "Total number of requests rejected with no backend available",
            unavailable_total.clone(),
        );
        registry.register(
            "dispatchlb_backend_health",
            "Backend health status (1=healthy, 0=unhealthy)",
            backend_health.clone(),
        );
        registry.register(
            "dispatchlb_health_checks",
            "Total number of health checks performed",
            health_checks_total.clone(),
        );
        registry.register(
            "dispatchlb_backends_registered",
            "Number of registered backends",
            backends_registered.clone(),
        );
        registry.register(
            "dispatchlb_active_connections",
            "Number of open client connections",
            active_connections.clone(),
        );
        registry.register(
            "dispatchlb_connections",
            "Total number of client connections",
            connections_total.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                requests_total,
                request_duration_seconds,
                forward_failures_total,
                unavailable_total,
                backend_health,
                health_checks_total,
                backends_registered,
                active_connections,
                connections_total,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Record a request answered by `backend`.
    pub fn record_request(&self, backend: &str, status: u16, duration: Duration) {
        let labels = RequestLabels {
            backend: backend.to_string(),
            status: status.to_string(),
        };
        self.inner.requests_total.get_or_create(&labels).inc();
        self.inner
            .request_duration_seconds
            .get_or_create(&BackendLabels {
                backend: backend.to_string(),
            })
            .observe(duration.as_secs_f64());
    }

    /// Record a request that failed while being forwarded to `backend`.
    pub fn record_forward_failure(&self, backend: &str) {
        self.inner
            .forward_failures_total
            .get_or_create(&BackendLabels {
                backend: backend.to_string(),
            })
            .inc();
    }

    /// Record a request rejected because no backend was available.
    pub fn record_unavailable(&self) {
        self.inner.unavailable_total.inc();
    }

    /// Update backend health status.
    pub fn set_backend_health(&self, backend: &str, healthy: bool) {
        self.inner
            .backend_health
            .get_or_create(&BackendLabels {
                backend: backend.to_string(),
            })
            .set(if healthy { 1 } else { 0 });
    }

    /// Record a health check result.
    pub fn record_health_check(&self, backend: &str, success: bool) {
        let labels = HealthCheckLabels {
            backend: backend.to_string(),
            result: if success {
                HealthCheckResult::Success
            } else {
                HealthCheckResult::Failure
            },
        };
        self.inner.health_checks_total.get_or_create(&labels).inc();
    }

    /// Set the number of registered backends.
    pub fn set_backends_registered(&self, count: usize) {
        self.inner
            .backends_registered
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Increment active connections.
    pub fn connection_opened(&self) {
        self.inner.active_connections.inc();
        self.inner.connections_total.inc();
    }

    /// Decrement active connections.
    pub fn connection_closed(&self) {
        self.inner.active_connections.dec();
    }

    /// Start timing a request against `backend`.
    pub fn start_request_timer(&self, backend: &str) -> RequestTimer {
        RequestTimer {
            collector: self.clone(),
            backend: backend.to_string(),
            start: Instant::now(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Measures one request from dispatch to response headers.
pub struct RequestTimer {
    collector: MetricsCollector,
    backend: String,
    start: Instant,
}

impl RequestTimer {
    /// Get the elapsed duration.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Record a completed request and consume the timer.
    pub fn record(self, status: u16) {
        let duration = self.start.elapsed();
        self.collector.record_request(&self.backend, status, duration);
    }
}
