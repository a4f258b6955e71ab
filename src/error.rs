//! Error types for backend registration, selection and forwarding.

use crate::proxy::ForwardError;
use thiserror::Error;

/// Errors produced by the dispatch core.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Malformed backend address, or an identity that is already registered.
    #[error("invalid backend: {0}")]
    InvalidBackend(String),

    /// Weights must be finite and greater than zero.
    #[error("invalid weight {0}: must be a finite number greater than 0")]
    InvalidWeight(f64),

    /// No healthy backend was found within the bounded search.
    #[error("no backend available")]
    NoBackendAvailable,

    /// The chosen backend could not complete the request.
    #[error("forwarding to {backend} failed: {source}")]
    ForwardFailure {
        backend: String,
        #[source]
        source: ForwardError,
    },
}

impl DispatchError {
    /// Whether this error means the request never reached a backend.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DispatchError::NoBackendAvailable)
    }
}
