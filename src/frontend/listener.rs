//! Frontend listener implementation.
//!
//! Accepts client connections and serves HTTP/1.1 on each of them, handing
//! every request to the dispatcher.

use crate::backend::Dispatcher;
use crate::metrics::MetricsCollector;
use crate::proxy::{Forwarder, ProxyBody, error_response};
use crate::util::{ConnectionId, RequestId};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

/// Frontend listener that accepts and handles connections.
pub struct FrontendListener<F> {
    /// TCP listener.
    listener: TcpListener,
    /// Address actually bound.
    local_addr: SocketAddr,
    /// Shared dispatcher.
    dispatcher: Arc<Dispatcher<F>>,
    /// Metrics collector.
    metrics: MetricsCollector,
}

impl<F> FrontendListener<F>
where
    F: Forwarder<Body = Incoming>,
{
    /// Bind the listener.
    pub async fn bind(
        addr: SocketAddr,
        dispatcher: Arc<Dispatcher<F>>,
        metrics: MetricsCollector,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            listen = %local_addr,
            algorithm = dispatcher.algorithm(),
            "frontend listener bound"
        );

        Ok(Self {
            listener,
            local_addr,
            dispatcher,
            metrics,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the listener, accepting connections until shutdown.
    #[instrument(skip_all, fields(listen = %self.local_addr))]
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("frontend listener starting");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("frontend listener shutting down");
                    break;
                }
            }
        }
    }

    /// Serve one client connection on its own task.
    fn handle_connection(&self, stream: TcpStream, client_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let metrics = self.metrics.clone();
        let connection_id = ConnectionId::next();

        metrics.connection_opened();

        tokio::spawn(async move {
            let start_time = Instant::now();
            let io = TokioIo::new(stream);

            let service = service_fn(move |req| {
                let dispatcher = Arc::clone(&dispatcher);
                async move { serve_request(req, &dispatcher, client_addr, connection_id).await }
            });

            let result = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(io, service)
                .await;

            metrics.connection_closed();

            let duration = start_time.elapsed();
            match result {
                Ok(()) => debug!(
                    connection = %connection_id,
                    client = %client_addr,
                    duration_ms = duration.as_millis(),
                    "connection completed"
                ),
                Err(e) => warn!(
                    connection = %connection_id,
                    client = %client_addr,
                    duration_ms = duration.as_millis(),
                    error = %e,
                    "connection handling failed"
                ),
            }
        });
    }
}

/// Route one request and turn dispatch errors into client responses.
async fn serve_request<F>(
    req: Request<Incoming>,
    dispatcher: &Dispatcher<F>,
    client_addr: SocketAddr,
    connection_id: ConnectionId,
) -> Result<Response<ProxyBody>, Infallible>
where
    F: Forwarder<Body = Incoming>,
{
    let span = info_span!(
        "request",
        request_id = %RequestId::new(),
        connection = %connection_id,
        client = %client_addr,
    );

    async move {
        let response = match dispatcher.route(req).await {
            Ok(response) => response,
            Err(e) if e.is_unavailable() => {
                error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
            }
            Err(e) => {
                warn!(error = %e, "request failed");
                error_response(StatusCode::BAD_GATEWAY, "backend request failed")
            }
        };

        debug!(status = response.status().as_u16(), "request completed");
        Ok(response)
    }
    .instrument(span)
    .await
}
