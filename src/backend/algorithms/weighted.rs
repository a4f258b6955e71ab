//! Weighted round-robin load balancing algorithm.
//!
//! Each backend owns a virtual deadline. Selection pops the backend with the
//! earliest deadline and pushes it back one interval (`1 / weight`) later,
//! so a backend with weight 3 comes up three times as often as one with
//! weight 1 while turns stay interleaved instead of bursting.

use super::LoadBalancer;
use crate::backend::{Backend, Pool};
use crate::error::DispatchError;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::debug;

/// Virtual time above which all deadlines are shifted back towards zero.
const RENORMALIZE_THRESHOLD: f64 = (1u64 << 20) as f64;

/// Relative share of traffic for a backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weight(f64);

impl Weight {
    /// Weight used when none is configured.
    pub const DEFAULT: Weight = Weight(1.0);

    /// Validate a weight. It must be finite and greater than zero.
    pub fn new(value: f64) -> Result<Self, DispatchError> {
        if value.is_finite() && value > 0.0 && (1.0 / value).is_finite() {
            Ok(Self(value))
        } else {
            Err(DispatchError::InvalidWeight(value))
        }
    }

    /// The raw weight value.
    pub fn get(self) -> f64 {
        self.0
    }

    /// Virtual time between two turns of a backend with this weight.
    fn interval(self) -> f64 {
        1.0 / self.0
    }
}

impl Default for Weight {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A backend's slot in the schedule.
struct Entry {
    deadline: f64,
    /// Registration order, breaks deadline ties.
    seq: u64,
    interval: f64,
    backend: Arc<Backend>,
}

// Reversed so that `BinaryHeap` (a max-heap) yields the earliest deadline.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .total_cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

struct Schedule {
    heap: BinaryHeap<Entry>,
    /// Deadline of the most recently popped backend.
    current_deadline: f64,
    next_seq: u64,
    renormalize_threshold: f64,
}

impl Schedule {
    fn renormalize_if_needed(&mut self) {
        if self.current_deadline < self.renormalize_threshold {
            return;
        }

        // Every scheduled deadline is >= current_deadline, so shifting by it
        // keeps them non-negative and preserves their order.
        let shift = self.current_deadline;
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        for entry in &mut entries {
            entry.deadline -= shift;
        }
        self.heap = BinaryHeap::from(entries);
        self.current_deadline = 0.0;

        debug!(shift, backends = self.heap.len(), "renormalized weighted schedule");
    }
}

/// Weighted load balancer.
///
/// Distributes requests proportionally to backend weights using
/// earliest-deadline-first scheduling.
pub struct Weighted {
    schedule: Mutex<Schedule>,
}

impl Weighted {
    /// Create a new weighted load balancer.
    pub fn new() -> Self {
        Self::with_threshold(RENORMALIZE_THRESHOLD)
    }

    fn with_threshold(renormalize_threshold: f64) -> Self {
        Self {
            schedule: Mutex::new(Schedule {
                heap: BinaryHeap::new(),
                current_deadline: 0.0,
                next_seq: 0,
                renormalize_threshold,
            }),
        }
    }

    /// Add a backend to the schedule.
    ///
    /// Its first turn is one interval after the current virtual time, so a
    /// late joiner neither jumps the queue nor waits behind the whole past.
    pub fn add(&self, backend: Arc<Backend>, weight: Weight) {
        let mut schedule = self.schedule.lock();
        let interval = weight.interval();
        let entry = Entry {
            deadline: schedule.current_deadline + interval,
            seq: schedule.next_seq,
            interval,
            backend,
        };
        schedule.next_seq += 1;
        schedule.heap.push(entry);
    }

    /// Virtual time of the most recent selection.
    pub fn current_deadline(&self) -> f64 {
        self.schedule.lock().current_deadline
    }

    /// Number of scheduled backends.
    pub fn len(&self) -> usize {
        self.schedule.lock().heap.len()
    }

    /// Whether no backend is scheduled.
    pub fn is_empty(&self) -> bool {
        self.schedule.lock().heap.is_empty()
    }
}

impl Default for Weighted {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for Weighted {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn on_register(&self, backend: &Arc<Backend>, weight: Weight) {
        self.add(Arc::clone(backend), weight);
    }

    fn select(&self, pool: &Pool) -> Result<Arc<Backend>, DispatchError> {
        let mut schedule = self.schedule.lock();
        let attempts = schedule.heap.len();
        let mut selected = None;

        for _ in 0..attempts {
            let Some(mut entry) = schedule.heap.pop() else {
                break;
            };

            // Skipped backends are rescheduled too, so one that recovers
            // does not come back with a stale, early deadline.
            schedule.current_deadline = entry.deadline;
            entry.deadline += entry.interval;
            let healthy = pool.is_healthy(entry.backend.id());
            let backend = Arc::clone(&entry.backend);
            schedule.heap.push(entry);

            if healthy {
                selected = Some(backend);
                break;
            }
        }

        schedule.renormalize_if_needed();
        selected.ok_or(DispatchError::NoBackendAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Registry;
    use std::collections::HashMap;

    fn setup(weights: &[(u16, f64)]) -> (Weighted, Registry) {
        setup_with(Weighted::new(), weights)
    }

    fn setup_with(wrr: Weighted, weights: &[(u16, f64)]) -> (Weighted, Registry) {
        let registry = Registry::new();
        for &(port, weight) in weights {
            let backend = Arc::new(Backend::new(&format!("127.0.0.1:{}", port)).unwrap());
            registry.register(Arc::clone(&backend)).unwrap();
            wrr.on_register(&backend, Weight::new(weight).unwrap());
        }
        (wrr, registry)
    }

    fn count(wrr: &Weighted, pool: &Pool, n: usize) -> HashMap<u16, usize> {
        let mut counts = HashMap::new();
        for _ in 0..n {
            let backend = wrr.select(pool).unwrap();
            let port = backend.connect_addr().rsplit(':').next().unwrap().parse().unwrap();
            *counts.entry(port).or_default() += 1;
        }
        counts
    }

    #[test]
    fn test_weight_validation() {
        assert!(Weight::new(1.0).is_ok());
        assert!(Weight::new(0.25).is_ok());
        for value in [0.0, -1.0, f64::NAN, f64::INFINITY, f64::MIN_POSITIVE / 4.0] {
            assert!(matches!(
                Weight::new(value),
                Err(DispatchError::InvalidWeight(_))
            ));
        }
        assert_eq!(Weight::default().get(), 1.0);
    }

    #[test]
    fn test_interleaves_instead_of_bursting() {
        let (wrr, registry) = setup(&[(9001, 1.0), (9002, 2.0)]);
        let pool = registry.snapshot();

        let order: Vec<String> = (0..6)
            .map(|_| wrr.select(&pool).unwrap().id().to_string())
            .collect();

        let a = "http://127.0.0.1:9001";
        let b = "http://127.0.0.1:9002";
        assert_eq!(order, vec![b, a, b, b, a, b]);
    }

    #[test]
    fn test_weighted_distribution() {
        let (wrr, registry) = setup(&[(9001, 3.0), (9002, 1.0)]);
        let pool = registry.snapshot();

        let counts = count(&wrr, &pool, 400);

        // 3:1 weights, allow for floating point tie-breaks
        assert!((299..=301).contains(&counts[&9001]), "{:?}", counts);
        assert!((99..=101).contains(&counts[&9002]), "{:?}", counts);
    }

    #[test]
    fn test_one_to_two_over_300() {
        let (wrr, registry) = setup(&[(9001, 1.0), (9002, 2.0)]);
        let pool = registry.snapshot();

        let counts = count(&wrr, &pool, 300);
        assert!((90..=110).contains(&counts[&9001]), "{:?}", counts);
        assert!((180..=220).contains(&counts[&9002]), "{:?}", counts);
    }

    #[test]
    fn test_never_selects_unhealthy() {
        let (wrr, registry) = setup(&[(9001, 1.0), (9002, 3.0), (9003, 2.0)]);
        registry.mark_unhealthy("http://127.0.0.1:9002");
        let pool = registry.snapshot();

        let counts = count(&wrr, &pool, 300);
        assert_eq!(counts.get(&9002), None);
        assert!((95..=105).contains(&counts[&9001]), "{:?}", counts);
        assert!((195..=205).contains(&counts[&9003]), "{:?}", counts);
    }

    #[test]
    fn test_all_unhealthy_fails_without_hanging() {
        let (wrr, registry) = setup(&[(9001, 1.0), (9002, 1.0)]);
        registry.mark_unhealthy("http://127.0.0.1:9001");
        registry.mark_unhealthy("http://127.0.0.1:9002");
        let pool = registry.snapshot();

        assert!(matches!(
            wrr.select(&pool),
            Err(DispatchError::NoBackendAvailable)
        ));
        // Both were still rescheduled
        assert_eq!(wrr.current_deadline(), 1.0);
    }

    #[test]
    fn test_empty_schedule() {
        let wrr = Weighted::new();
        let pool = Registry::new().snapshot();
        assert!(wrr.is_empty());
        assert!(matches!(
            wrr.select(&pool),
            Err(DispatchError::NoBackendAvailable)
        ));
    }

    #[test]
    fn test_recovered_backend_does_not_monopolize() {
        let (wrr, registry) = setup(&[(9001, 1.0), (9002, 1.0)]);
        registry.mark_unhealthy("http://127.0.0.1:9002");
        let degraded = registry.snapshot();
        let counts = count(&wrr, &degraded, 100);
        assert_eq!(counts[&9001], 100);

        registry.mark_healthy("http://127.0.0.1:9002");
        let recovered = registry.snapshot();
        let counts = count(&wrr, &recovered, 10);
        assert_eq!(counts[&9001], 5);
        assert_eq!(counts[&9002], 5);
    }

    #[test]
    fn test_late_joiner_starts_from_current_deadline() {
        let wrr = Weighted::new();
        let registry = Registry::new();

        let first = Arc::new(Backend::new("127.0.0.1:9001").unwrap());
        registry.register(Arc::clone(&first)).unwrap();
        wrr.on_register(&first, Weight::DEFAULT);

        let pool = registry.snapshot();
        for _ in 0..50 {
            wrr.select(&pool).unwrap();
        }
        assert_eq!(wrr.current_deadline(), 50.0);

        let second = Arc::new(Backend::new("127.0.0.1:9002").unwrap());
        registry.register(Arc::clone(&second)).unwrap();
        wrr.on_register(&second, Weight::DEFAULT);
        assert_eq!(wrr.len(), 2);

        let pool = registry.snapshot();
        let counts = count(&wrr, &pool, 20);
        assert_eq!(counts[&9001], 10);
        assert_eq!(counts[&9002], 10);
    }

    #[test]
    fn test_renormalization_preserves_ratio() {
        let (wrr, registry) = setup_with(Weighted::with_threshold(8.0), &[(9001, 1.0), (9002, 3.0)]);
        let pool = registry.snapshot();

        let counts = count(&wrr, &pool, 1000);

        assert!(wrr.current_deadline() < 8.0);
        assert!((248..=252).contains(&counts[&9001]), "{:?}", counts);
        assert!((748..=752).contains(&counts[&9002]), "{:?}", counts);
    }
}
