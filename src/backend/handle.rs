//! Backend handle.
//!
//! A `Backend` is one upstream server: its identity, the address used to
//! reach it, and a live count of requests currently forwarded through it.

use crate::error::DispatchError;
use hyper::Uri;
use hyper::http::uri::Authority;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A single upstream server.
#[derive(Debug)]
pub struct Backend {
    /// Normalized base address, used as the identity everywhere.
    id: String,
    /// Authority from the configured address (host and optional port).
    authority: Authority,
    /// `host:port` to open TCP connections to.
    connect_addr: String,
    /// Requests currently being forwarded to this backend.
    inflight: AtomicUsize,
}

impl Backend {
    /// Create a backend from a base address such as `http://10.0.0.1:8080`.
    ///
    /// A bare `host:port` is accepted and treated as `http`. Addresses with
    /// another scheme, user info, a path or a query are rejected.
    pub fn new(address: &str) -> Result<Self, DispatchError> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(DispatchError::InvalidBackend(
                "address cannot be empty".to_string(),
            ));
        }

        let normalized = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };

        let uri: Uri = normalized
            .parse()
            .map_err(|e| DispatchError::InvalidBackend(format!("'{}': {}", address, e)))?;

        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => {
                return Err(DispatchError::InvalidBackend(format!(
                    "'{}': unsupported scheme '{}'",
                    address, other
                )));
            }
            None => {
                return Err(DispatchError::InvalidBackend(format!(
                    "'{}': missing scheme",
                    address
                )));
            }
        }

        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| DispatchError::InvalidBackend(format!("'{}': missing host", address)))?;

        if authority.as_str().contains('@') {
            return Err(DispatchError::InvalidBackend(format!(
                "'{}': user info is not supported",
                address
            )));
        }

        if !matches!(uri.path(), "" | "/") || uri.query().is_some() {
            return Err(DispatchError::InvalidBackend(format!(
                "'{}': base address must not include a path or query",
                address
            )));
        }

        let port = authority.port_u16().unwrap_or(80);
        let connect_addr = format!("{}:{}", authority.host(), port);

        Ok(Self {
            id: format!("http://{}", authority),
            authority,
            connect_addr,
            inflight: AtomicUsize::new(0),
        })
    }

    /// The backend identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The configured authority, suitable for a `Host` header.
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// The `host:port` pair to connect to.
    pub fn connect_addr(&self) -> &str {
        &self.connect_addr
    }

    /// Number of requests currently in flight to this backend.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    /// Count a request as in flight until the returned guard is dropped.
    pub fn acquire(self: &Arc<Self>) -> InflightGuard {
        self.inflight.fetch_add(1, Ordering::AcqRel);
        InflightGuard {
            backend: Arc::clone(self),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Releases one in-flight slot on its backend when dropped.
#[derive(Debug)]
pub struct InflightGuard {
    backend: Arc<Backend>,
}

impl InflightGuard {
    /// The backend this guard is counted against.
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.backend.inflight.fetch_sub(1, Ordering::AcqRel);
    }
}
