//! Backend selection algorithms.

mod power_of_two;
mod round_robin;
mod weighted;

pub use power_of_two::PowerOfTwo;
pub use round_robin::RoundRobin;
pub use weighted::{Weight, Weighted};

use crate::backend::{Backend, Pool};
use crate::config::Algorithm;
use crate::error::DispatchError;
use std::sync::Arc;

/// Trait for backend selection algorithms.
pub trait LoadBalancer: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Notify the algorithm that a backend joined the registry.
    ///
    /// Called after the backend is registered. Algorithms that keep their
    /// own per-backend state must make it fully initialized before it is
    /// visible to concurrent `select` calls.
    fn on_register(&self, _backend: &Arc<Backend>, _weight: Weight) {}

    /// Select the next backend from the healthy part of `pool`.
    ///
    /// # Returns
    ///
    /// The chosen backend, or [`DispatchError::NoBackendAvailable`] when no
    /// healthy backend is found within the algorithm's bounded search.
    fn select(&self, pool: &Pool) -> Result<Arc<Backend>, DispatchError>;
}

/// Build the load balancer for a configured algorithm.
pub fn for_algorithm(algorithm: &Algorithm) -> Arc<dyn LoadBalancer> {
    match algorithm {
        Algorithm::RoundRobin => Arc::new(RoundRobin::new()),
        Algorithm::Weighted => Arc::new(Weighted::new()),
        Algorithm::PowerOfTwo => Arc::new(PowerOfTwo::new()),
    }
}
