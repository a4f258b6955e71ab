//! Request forwarding to backends.
//!
//! The dispatcher only needs to hand a request to a chosen backend and get a
//! response back. [`Forwarder`] is that seam; [`HttpClient`] implements it
//! over plain HTTP/1.1 connections.

mod body;
mod http_proxy;

pub use body::GuardedBody;
pub use http_proxy::{HttpClient, HttpClientConfig, error_response};

use crate::backend::Backend;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::{Request, Response};
use std::future::Future;
use std::io;

/// Response body type produced by forwarding.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Errors raised while talking to a backend.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("failed to connect to backend: {0}")]
    Connect(#[from] io::Error),

    #[error("connection timeout to backend {0}")]
    ConnectTimeout(String),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unexpected status: {0}")]
    UnexpectedStatus(u16),
}

/// Sends a request to one backend and returns its response.
pub trait Forwarder: Send + Sync + 'static {
    /// Request body type accepted by this forwarder.
    type Body: Send + 'static;

    /// Forward `req` to `backend`.
    fn forward(
        &self,
        backend: &Backend,
        req: Request<Self::Body>,
    ) -> impl Future<Output = Result<Response<ProxyBody>, ForwardError>> + Send;
}
