// SPDX-License-Identifier: Apache-2.0

use http::Method;
use http_body_util::Full;
use hyper::body::Body;
use hyper::body::Bytes;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use opentelemetry_prometheus_text_exporter::PrometheusExporter;

use std::fmt::{Debug, Display};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::{BoxError, Service};
use tracing::{error, info};

pub const METRICS_PATH: &str = "/metrics";

/// MetricsServer exposes the shipper statistics in the Prometheus text format
pub struct MetricsServer {
    listener: TcpListener,
    exporter: PrometheusExporter,
}

impl MetricsServer {
    /// Binds the metrics endpoint. Nothing is served until [`MetricsServer::serve`].
    pub async fn bind(addr: SocketAddr, exporter: PrometheusExporter) -> Result<Self, BoxError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| format!("unable to bind metrics endpoint {}: {}", addr, e))?;

        Ok(Self { listener, exporter })
    }

    /// Returns the address actually bound
    pub fn local_addr(&self) -> Result<SocketAddr, BoxError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves requests until cancelled
    pub async fn serve(self, cancellation: CancellationToken) -> Result<(), BoxError> {
        let svc = MetricsService::new(self.exporter);

        // To bridge Tower->Hyper we must wrap the tower service
        let svc = TowerToHyperService::new(svc);

        let timer = hyper_util::rt::TokioTimer::new();
        let graceful = hyper_util::server::graceful::GracefulShutdown::new();

        let mut builder = Builder::new(TokioExecutor::new());
        builder.http1().timer(timer.clone());
        builder.http2().timer(timer);

        if let Ok(addr) = self.listener.local_addr() {
            info!(address = %addr, "Serving metrics");
        }

        loop {
            let stream = tokio::select! {
                r = self.listener.accept() => {
                    match r {
                        Ok((stream, _)) => stream,
                        Err(e) => return Err(e.into()),
                    }
                },
                _ = cancellation.cancelled() => break
            };

            let io = TokioIo::new(stream);

            let conn = builder.serve_connection(io, svc.clone());
            let fut = graceful.watch(conn.into_owned());

            tokio::spawn(async move {
                let _ = fut.await.map_err(|e| {
                    error!("error serving metrics connection: {:?}", e);
                });
            });
        }

        // gracefully shutdown existing connections
        graceful.shutdown().await;

        Ok(())
    }
}

/// Service implementation for handling metrics requests
#[derive(Clone)]
struct MetricsService {
    exporter: PrometheusExporter,
}

impl MetricsService {
    fn new(exporter: PrometheusExporter) -> Self {
        Self { exporter }
    }

    fn render(&self) -> Response<Full<Bytes>> {
        let mut output = Vec::new();
        let result = match self.exporter.export(&mut output) {
            Ok(_) => Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; charset=utf-8")
                .body(Full::new(Bytes::from(output))),
            Err(err) => Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from(format!("Failed to export: {}", err)))),
        };

        result.unwrap_or_else(|_| internal_error())
    }
}

impl<H> Service<Request<H>> for MetricsService
where
    H: Body + Send + Sync + 'static,
    <H as Body>::Data: Send + Sync + Clone,
    <H as Body>::Error: Display + Debug + Send + Sync + ToString,
{
    type Response = Response<Full<Bytes>>;
    type Error = hyper::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<H>) -> Self::Future {
        let response = match (req.method(), req.uri().path()) {
            (&Method::GET, METRICS_PATH) => self.render(),
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from_static(b"Not Found")))
                .unwrap_or_else(|_| internal_error()),
        };

        Box::pin(futures::future::ok(response))
    }
}

fn internal_error() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
