//! dispatchlb - HTTP request dispatcher with health-aware load balancing
//!
//! This crate provides:
//! - A concurrent backend registry with a lock-free healthy view
//! - Round-robin, weighted (deadline scheduled) and power-of-two-choices selection
//! - Active HTTP health checking
//! - Backend addition on configuration reload
//! - Prometheus metrics

pub mod backend;
pub mod config;
pub mod error;
pub mod frontend;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod util;

pub use backend::Dispatcher;
pub use config::Config;
pub use error::DispatchError;
