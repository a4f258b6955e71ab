//! Prometheus metrics HTTP server.
//!
//! Serves metrics on a configurable HTTP endpoint.

use crate::metrics::MetricsCollector;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus_client::encoding::text::encode;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus metrics HTTP server.
pub struct MetricsServer {
    /// Address to bind.
    address: SocketAddr,
    /// Path for metrics endpoint.
    path: String,
    /// Metrics collector.
    collector: MetricsCollector,
}

impl MetricsServer {
    /// Create a new metrics server.
    pub fn new(address: SocketAddr, path: String, collector: MetricsCollector) -> Self {
        Self {
            address,
            path,
            collector,
        }
    }

    /// Run the metrics server.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let listener = match TcpListener::bind(self.address).await {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, address = %self.address, "failed to bind metrics server");
                return;
            }
        };

        info!(address = %self.address, path = %self.path, "metrics server started");

        let collector = Arc::new(self.collector);
        let path = Arc::new(self.path);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let collector = Arc::clone(&collector);
                            let path = Arc::clone(&path);

                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let collector = Arc::clone(&collector);
                                    let path = Arc::clone(&path);
                                    async move {
                                        handle_request(req, &collector, &path).await
                                    }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(error = %e, "metrics connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept metrics connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("metrics server shutting down");
                    break;
                }
            }
        }
    }
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Handle an incoming metrics request.
async fn handle_request<B>(
    req: Request<B>,
    collector: &MetricsCollector,
    metrics_path: &str,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path();
    let method = req.method();

    debug!(path = %path, method = %method, "metrics request");

    if method != Method::GET {
        return Ok(text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "text/plain",
            "Method not allowed\n".to_string(),
        ));
    }

    let response = if path == metrics_path {
        let mut buffer = String::new();
        match encode(&mut buffer, collector.registry()) {
            Ok(()) => text_response(StatusCode::OK, METRICS_CONTENT_TYPE, buffer),
            Err(e) => {
                error!(error = %e, "failed to encode metrics");
                text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    "Failed to encode metrics\n".to_string(),
                )
            }
        }
    } else if path == "/health" || path == "/healthz" {
        text_response(StatusCode::OK, "text/plain", "OK\n".to_string())
    } else if path == "/" {
        let body = format!(
            "dispatchlb metrics server\n\nEndpoints:\n  {} - Prometheus metrics\n  /health - Health check\n",
            metrics_path
        );
        text_response(StatusCode::OK, "text/plain", body)
    } else {
        text_response(StatusCode::NOT_FOUND, "text/plain", "Not found\n".to_string())
    };

    Ok(response)
}
