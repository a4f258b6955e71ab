//! Backend registry.
//!
//! Holds the ordered list of registered backends together with the set of
//! identities currently considered healthy. Both live in one immutable
//! [`Pool`] value that is swapped atomically on every change, so readers on
//! the request path never take a lock and always see a consistent view.

use crate::backend::Backend;
use crate::error::DispatchError;
use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::Arc;

/// A point-in-time view of the registry.
#[derive(Debug, Clone, Default)]
pub struct Pool {
    /// Registered backends in insertion order.
    backends: Vec<Arc<Backend>>,
    /// Identities of healthy backends. Always a subset of `backends`.
    healthy: HashSet<String>,
}

impl Pool {
    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether no backend is registered.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// All registered backends in insertion order.
    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// Whether a backend with this identity is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.backends.iter().any(|b| b.id() == id)
    }

    /// Whether the identity is eligible for selection.
    pub fn is_healthy(&self, id: &str) -> bool {
        self.healthy.contains(id)
    }

    /// Number of healthy backends.
    pub fn healthy_count(&self) -> usize {
        self.healthy.len()
    }

    /// Healthy backends in insertion order.
    pub fn healthy(&self) -> Vec<Arc<Backend>> {
        self.backends
            .iter()
            .filter(|b| self.healthy.contains(b.id()))
            .cloned()
            .collect()
    }

    fn needs_health_change(&self, id: &str, healthy: bool) -> bool {
        self.contains(id) && self.is_healthy(id) != healthy
    }

    /// Identities of healthy backends in insertion order.
    pub fn healthy_ids(&self) -> Vec<String> {
        self.backends
            .iter()
            .filter(|b| self.healthy.contains(b.id()))
            .map(|b| b.id().to_string())
            .collect()
    }
}

/// Concurrent registry of backends and their health.
#[derive(Debug, Default)]
pub struct Registry {
    pool: ArcSwap<Pool>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a backend and mark it healthy.
    ///
    /// Fails with [`DispatchError::InvalidBackend`] if a backend with the same
    /// identity is already registered; the registry is left unchanged.
    pub fn register(&self, backend: Arc<Backend>) -> Result<(), DispatchError> {
        let mut duplicate = false;

        self.pool.rcu(|current| {
            duplicate = current.contains(backend.id());
            if duplicate {
                return Arc::clone(current);
            }

            let mut next = Pool::clone(current);
            next.healthy.insert(backend.id().to_string());
            next.backends.push(Arc::clone(&backend));
            Arc::new(next)
        });

        if duplicate {
            return Err(DispatchError::InvalidBackend(format!(
                "'{}' is already registered",
                backend.id()
            )));
        }

        Ok(())
    }

    /// Take a consistent snapshot of backends and health.
    pub fn snapshot(&self) -> Arc<Pool> {
        self.pool.load_full()
    }

    /// Identities currently eligible for selection.
    pub fn healthy_snapshot(&self) -> HashSet<String> {
        self.pool.load().healthy.clone()
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.pool.load().len()
    }

    /// Whether no backend is registered.
    pub fn is_empty(&self) -> bool {
        self.pool.load().is_empty()
    }

    /// Mark a registered backend healthy.
    ///
    /// Returns `true` if membership changed. Unknown identities are ignored.
    pub fn mark_healthy(&self, id: &str) -> bool {
        self.update_health(id, true)
    }

    /// Mark a backend unhealthy.
    ///
    /// Returns `true` if membership changed. Unknown or already-unhealthy
    /// identities are a no-op.
    pub fn mark_unhealthy(&self, id: &str) -> bool {
        self.update_health(id, false)
    }

    fn update_health(&self, id: &str, healthy: bool) -> bool {
        if !self.pool.load().needs_health_change(id, healthy) {
            return false;
        }

        let mut changed = false;
        self.pool.rcu(|current| {
            changed = current.needs_health_change(id, healthy);
            if !changed {
                return Arc::clone(current);
            }

            let mut next = Pool::clone(current);
            if healthy {
                next.healthy.insert(id.to_string());
            } else {
                next.healthy.remove(id);
            }
            Arc::new(next)
        });

        changed
    }
}
