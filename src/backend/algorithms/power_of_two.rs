//! Power-of-two-choices load balancing algorithm.

use super::LoadBalancer;
use crate::backend::{Backend, Pool};
use crate::error::DispatchError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Power-of-two-choices load balancer.
///
/// Samples two distinct healthy backends at random and picks the one with
/// fewer requests in flight. Ties go to the second sample.
pub struct PowerOfTwo {
    /// Held only for the two draws.
    rng: Mutex<fastrand::Rng>,
}

impl PowerOfTwo {
    /// Create a new power-of-two-choices load balancer with a random seed.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(fastrand::Rng::new()),
        }
    }

    /// Create a load balancer with a fixed seed, for reproducible sampling.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(fastrand::Rng::with_seed(seed)),
        }
    }

    /// Draw two indices in `0..n`, forcing them apart when they collide.
    fn sample(&self, n: usize) -> (usize, usize) {
        let (i, j) = {
            let mut rng = self.rng.lock();
            (rng.usize(..n), rng.usize(..n))
        };

        if i == j { ((j + 1) % n, j) } else { (i, j) }
    }
}

impl Default for PowerOfTwo {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for PowerOfTwo {
    fn name(&self) -> &'static str {
        "power_of_two"
    }

    fn select(&self, pool: &Pool) -> Result<Arc<Backend>, DispatchError> {
        let mut healthy = pool.healthy();

        match healthy.len() {
            0 => Err(DispatchError::NoBackendAvailable),
            1 => Ok(healthy.swap_remove(0)),
            n => {
                let (i, j) = self.sample(n);
                let (first, second) = (&healthy[i], &healthy[j]);

                if first.inflight() < second.inflight() {
                    Ok(Arc::clone(first))
                } else {
                    Ok(Arc::clone(second))
                }
            }
        }
    }
}
