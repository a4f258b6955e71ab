//! Configuration loading, parsing, and validation.

mod loader;
mod types;
mod validation;
mod watcher;

pub use loader::{ConfigError, load_config};
pub use types::*;
pub use validation::validate_config;
pub use watcher::{ConfigWatcher, ReloadCallback};
