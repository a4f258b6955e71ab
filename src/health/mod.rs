//! Health checking for backend servers.

mod monitor;

pub use monitor::{CheckSummary, HealthMonitor, Prober};
