//! Backend registry, selection strategies and request dispatch.

pub mod algorithms;
mod dispatcher;
mod handle;
mod registry;

pub use dispatcher::Dispatcher;
pub use handle::{Backend, InflightGuard};
pub use registry::{Pool, Registry};
