//! Round-robin load balancing algorithm.

use super::LoadBalancer;
use crate::backend::{Backend, Pool};
use crate::error::DispatchError;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin load balancer.
///
/// Walks the registered backends in insertion order. Every candidate looked
/// at consumes one counter value, so an unhealthy backend is skipped without
/// favouring its successor on the next call. At most one full pass over the
/// registered backends is made per selection.
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    /// Create a new round-robin load balancer.
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, pool: &Pool) -> Result<Arc<Backend>, DispatchError> {
        let backends = pool.backends();
        if backends.is_empty() {
            return Err(DispatchError::NoBackendAvailable);
        }

        for _ in 0..backends.len() {
            let idx = self.counter.fetch_add(1, Ordering::Relaxed) % backends.len();
            let candidate = &backends[idx];
            if pool.is_healthy(candidate.id()) {
                return Ok(Arc::clone(candidate));
            }
        }

        Err(DispatchError::NoBackendAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Registry;
    use std::collections::HashMap;

    fn test_registry() -> Registry {
        let registry = Registry::new();
        for port in [8001, 8002, 8003] {
            let backend = Backend::new(&format!("127.0.0.1:{}", port)).unwrap();
            registry.register(Arc::new(backend)).unwrap();
        }
        registry
    }

    #[test]
    fn test_round_robin_cycles() {
        let rr = RoundRobin::new();
        let pool = test_registry().snapshot();

        let s1 = rr.select(&pool).unwrap();
        let s2 = rr.select(&pool).unwrap();
        let s3 = rr.select(&pool).unwrap();
        let s4 = rr.select(&pool).unwrap();

        assert_eq!(s1.id(), "http://127.0.0.1:8001");
        assert_eq!(s2.id(), "http://127.0.0.1:8002");
        assert_eq!(s3.id(), "http://127.0.0.1:8003");
        assert_eq!(s4.id(), s1.id()); // Cycles back
    }

    #[test]
    fn test_round_robin_empty() {
        let rr = RoundRobin::new();
        let pool = Registry::new().snapshot();
        assert!(matches!(
            rr.select(&pool),
            Err(DispatchError::NoBackendAvailable)
        ));
    }

    #[test]
    fn test_round_robin_skips_unhealthy_evenly() {
        let rr = RoundRobin::new();
        let registry = test_registry();
        registry.mark_unhealthy("http://127.0.0.1:8002");
        let pool = registry.snapshot();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..10 {
            let selected = rr.select(&pool).unwrap();
            *counts.entry(selected.id().to_string()).or_default() += 1;
        }

        assert_eq!(counts.get("http://127.0.0.1:8002"), None);
        assert_eq!(counts["http://127.0.0.1:8001"], 5);
        assert_eq!(counts["http://127.0.0.1:8003"], 5);
    }

    #[test]
    fn test_round_robin_all_unhealthy() {
        let rr = RoundRobin::new();
        let registry = test_registry();
        for port in [8001, 8002, 8003] {
            registry.mark_unhealthy(&format!("http://127.0.0.1:{}", port));
        }
        let pool = registry.snapshot();

        assert!(matches!(
            rr.select(&pool),
            Err(DispatchError::NoBackendAvailable)
        ));
        // Bounded search: exactly one pass was made
        assert_eq!(rr.counter.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_round_robin_uniform_over_healthy() {
        let rr = RoundRobin::new();
        let registry = Registry::new();
        for port in 9001..=9005 {
            let backend = Backend::new(&format!("127.0.0.1:{}", port)).unwrap();
            registry.register(Arc::new(backend)).unwrap();
        }
        registry.mark_unhealthy("http://127.0.0.1:9002");
        registry.mark_unhealthy("http://127.0.0.1:9005");
        let pool = registry.snapshot();

        let calls = 100;
        let healthy = pool.healthy_count();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..calls {
            let selected = rr.select(&pool).unwrap();
            *counts.entry(selected.id().to_string()).or_default() += 1;
        }

        for id in pool.healthy_ids() {
            assert!(
                counts[&id] >= calls / healthy,
                "{} selected only {} times",
                id,
                counts[&id]
            );
        }
    }
}
