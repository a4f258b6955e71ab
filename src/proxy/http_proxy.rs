//! HTTP/1.1 client used for forwarding requests and probing backends.

use crate::backend::Backend;
use crate::health::Prober;
use crate::proxy::{ForwardError, Forwarder, ProxyBody};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Incoming};
use hyper::client::conn::http1;
use hyper::header::{CONNECTION, CONTENT_TYPE, HOST, HeaderValue, USER_AGENT};
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Connect timeout for backend connections.
    pub connect_timeout: Duration,
    /// Path requested by health probes.
    pub probe_path: String,
    /// Status a probe must return to count as healthy.
    pub expected_status: u16,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            probe_path: "/".to_string(),
            expected_status: 200,
        }
    }
}

/// Plain HTTP/1.1 client, one connection per request.
#[derive(Debug, Clone, Default)]
pub struct HttpClient {
    config: HttpClientConfig,
}

impl HttpClient {
    /// Create a new client.
    pub fn new(config: HttpClientConfig) -> Self {
        Self { config }
    }

    /// Get the client configuration.
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

/// Open a connection to the backend and complete the HTTP/1.1 handshake.
async fn open<B>(
    backend: &Backend,
    connect_timeout: Duration,
) -> Result<http1::SendRequest<B>, ForwardError>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let stream = match timeout(connect_timeout, TcpStream::connect(backend.connect_addr())).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(ForwardError::Connect(e)),
        Err(_) => {
            return Err(ForwardError::ConnectTimeout(
                backend.connect_addr().to_string(),
            ));
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "failed to set TCP_NODELAY on backend connection");
    }

    let (sender, conn) = http1::handshake(TokioIo::new(stream)).await?;

    // Drive the connection until the exchange completes
    let backend_id = backend.id().to_string();
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            warn!(backend = %backend_id, error = %e, "backend connection error");
        }
    });

    Ok(sender)
}

impl Forwarder for HttpClient {
    type Body = Incoming;

    #[instrument(skip_all, fields(backend = %backend, method = %req.method(), uri = %req.uri()))]
    async fn forward(
        &self,
        backend: &Backend,
        mut req: Request<Incoming>,
    ) -> Result<Response<ProxyBody>, ForwardError> {
        // Backends expect origin-form targets
        let origin = match req.uri().path_and_query() {
            Some(pq) => Uri::from(pq.clone()),
            None => Uri::from_static("/"),
        };
        *req.uri_mut() = origin;

        if !req.headers().contains_key(HOST) {
            let host = HeaderValue::from_str(backend.authority().as_str())
                .map_err(|e| ForwardError::InvalidRequest(e.to_string()))?;
            req.headers_mut().insert(HOST, host);
        }

        let mut sender = open(backend, self.config.connect_timeout).await?;
        let response = sender.send_request(req).await?;

        debug!(status = response.status().as_u16(), "backend responded");

        Ok(response.map(BodyExt::boxed))
    }
}

impl Prober for HttpClient {
    async fn probe(&self, backend: &Backend) -> Result<(), ForwardError> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(self.config.probe_path.as_str())
            .header(HOST, backend.authority().as_str())
            .header(USER_AGENT, "dispatchlb-health-check")
            .header(CONNECTION, "close")
            .body(Empty::<Bytes>::new())
            .map_err(|e| ForwardError::InvalidRequest(e.to_string()))?;

        let mut sender = open(backend, self.config.connect_timeout).await?;
        let response = sender.send_request(req).await?;
        let status = response.status().as_u16();

        if status == self.config.expected_status {
            Ok(())
        } else {
            Err(ForwardError::UnexpectedStatus(status))
        }
    }
}

/// Create a plain-text error response.
pub fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from(format!("{}: {}\n", status, message)))
        .map_err(|never| match never {})
        .boxed();

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
