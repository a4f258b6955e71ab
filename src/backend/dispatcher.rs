//! Request dispatcher.
//!
//! Ties together the registry, one selection strategy and a forwarder:
//! every inbound request is sent to the backend the strategy picks.

use crate::backend::algorithms::{self, LoadBalancer, Weight};
use crate::backend::{Backend, Registry};
use crate::config::{Algorithm, BackendConfig};
use crate::error::DispatchError;
use crate::health::{HealthMonitor, Prober};
use crate::metrics::MetricsCollector;
use crate::proxy::{Forwarder, GuardedBody, ProxyBody, error_response};
use http_body_util::BodyExt;
use hyper::{Request, Response, StatusCode};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Routes requests to healthy backends.
pub struct Dispatcher<F> {
    registry: Arc<Registry>,
    balancer: Arc<dyn LoadBalancer>,
    forwarder: F,
    metrics: MetricsCollector,
}

impl<F: Forwarder> Dispatcher<F> {
    /// Create a dispatcher with no backends.
    pub fn new(algorithm: &Algorithm, forwarder: F, metrics: MetricsCollector) -> Self {
        Self::with_balancer(algorithms::for_algorithm(algorithm), forwarder, metrics)
    }

    /// Create a dispatcher around an already constructed strategy.
    pub fn with_balancer(
        balancer: Arc<dyn LoadBalancer>,
        forwarder: F,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            balancer,
            forwarder,
            metrics,
        }
    }

    /// The backend registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Name of the selection strategy in use.
    pub fn algorithm(&self) -> &'static str {
        self.balancer.name()
    }

    /// The forwarder requests are handed to.
    pub fn forwarder(&self) -> &F {
        &self.forwarder
    }

    /// Register a backend. It is immediately healthy.
    ///
    /// `weight` defaults to 1 and only affects the weighted strategy, but it
    /// is validated for every strategy. On any error the registry is left
    /// unchanged.
    pub fn add_backend(
        &self,
        address: &str,
        weight: Option<f64>,
    ) -> Result<Arc<Backend>, DispatchError> {
        let weight = weight.map(Weight::new).transpose()?.unwrap_or_default();
        let backend = Arc::new(Backend::new(address)?);

        self.registry.register(Arc::clone(&backend))?;
        self.balancer.on_register(&backend, weight);

        self.metrics.set_backends_registered(self.registry.len());
        self.metrics.set_backend_health(backend.id(), true);
        info!(backend = %backend, weight = weight.get(), "backend registered");

        Ok(backend)
    }

    /// Register every configured backend that is not registered yet.
    ///
    /// Backends missing from `backends` are kept; they are only reported.
    /// Returns the number of backends added.
    pub fn sync_backends(&self, backends: &[BackendConfig]) -> usize {
        let pool = self.registry.snapshot();
        let mut configured = HashSet::new();
        let mut added = 0;

        for entry in backends {
            let id = match Backend::new(&entry.address) {
                Ok(parsed) => parsed.id().to_string(),
                Err(e) => {
                    warn!(address = %entry.address, error = %e, "skipping invalid backend");
                    continue;
                }
            };

            if !configured.insert(id.clone()) || pool.contains(&id) {
                continue;
            }

            match self.add_backend(&entry.address, entry.weight) {
                Ok(_) => added += 1,
                Err(e) => warn!(address = %entry.address, error = %e, "failed to add backend"),
            }
        }

        for backend in pool.backends() {
            if !configured.contains(backend.id()) {
                warn!(backend = %backend, "backend no longer configured, keeping it registered");
            }
        }

        added
    }

    /// Pick a backend for the next request.
    pub fn select(&self) -> Result<Arc<Backend>, DispatchError> {
        let backend = self.balancer.select(&self.registry.snapshot())?;
        debug!(backend = %backend, algorithm = self.balancer.name(), "selected backend");
        Ok(backend)
    }

    /// Forward one request to a selected backend.
    ///
    /// When no backend is available the caller gets a `503 Service
    /// Unavailable` response. A failure while forwarding is returned as
    /// [`DispatchError::ForwardFailure`]; it is never retried on another
    /// backend.
    #[instrument(skip_all, fields(method = %req.method(), path = %req.uri().path()))]
    pub async fn route(&self, req: Request<F::Body>) -> Result<Response<ProxyBody>, DispatchError> {
        let backend = match self.select() {
            Ok(backend) => backend,
            Err(DispatchError::NoBackendAvailable) => {
                warn!(
                    registered = self.registry.len(),
                    "no healthy backend available"
                );
                self.metrics.record_unavailable();
                return Ok(error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "no backend available",
                ));
            }
            Err(e) => return Err(e),
        };

        // Held until the response body is finished
        let guard = backend.acquire();
        let timer = self.metrics.start_request_timer(backend.id());

        match self.forwarder.forward(&backend, req).await {
            Ok(response) => {
                timer.record(response.status().as_u16());
                Ok(response.map(|body| GuardedBody::new(body, guard).boxed()))
            }
            Err(source) => {
                self.metrics.record_forward_failure(backend.id());
                warn!(backend = %backend, error = %source, "forwarding failed");
                Err(DispatchError::ForwardFailure {
                    backend: backend.id().to_string(),
                    source,
                })
            }
        }
    }

    /// Start the health monitor on the current runtime.
    ///
    /// The monitor probes every registered backend once per `interval`,
    /// including backends added later, until `shutdown` fires.
    pub fn start_health_checking<P: Prober>(
        &self,
        prober: P,
        interval: Duration,
        timeout: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let monitor = HealthMonitor::new(
            Arc::clone(&self.registry),
            prober,
            interval,
            timeout,
            self.metrics.clone(),
        );
        tokio::spawn(monitor.run(shutdown))
    }
}
