//! Request pipeline component intercepting health checks on proxy ports.
//!
//! Requests arriving on a listener port with a configured target are answered
//! here and never reach the wrapped service:
//!
//! - `GET /status.html` is forwarded (through the shared worker) to the
//!   destination listener, and its cached or fresh status is returned.
//! - Any other path gets `404 Not Found`.
//! - If no answer is ready within the target timeout plus one second, the
//!   caller gets `504 Gateway Timeout`.
//!
//! Requests on other ports pass through to the wrapped service untouched.

use crate::metrics::{ProxyMetrics, RequestOutcome};
use crate::router::PortRouter;
use crate::snapshot::StatusSnapshot;
use crate::target::TargetClient;
use crate::types::{HEALTH_CHECK_PATH, LocalPort, PROXY_TARGET_HEADER, RESPONSE_WRITE_SLACK};
use crate::worker::{DEFAULT_QUEUE_CAPACITY, ProxyWorker, WorkerHandle};
use axum::body::Body;
use axum::response::Response;
use futures::future::BoxFuture;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{Request, StatusCode};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, info};

struct Shared {
    router: PortRouter,
    worker: WorkerHandle,
    metrics: Option<Arc<ProxyMetrics>>,
}

/// Layer installing the health check proxy in front of a service
#[derive(Clone)]
pub struct HealthCheckProxyLayer {
    shared: Arc<Shared>,
}

impl HealthCheckProxyLayer {
    /// Create the layer and spawn its worker on the current runtime
    pub fn new(router: PortRouter, metrics: Option<Arc<ProxyMetrics>>) -> Self {
        Self::with_queue_capacity(router, DEFAULT_QUEUE_CAPACITY, metrics)
    }

    pub fn with_queue_capacity(
        router: PortRouter,
        queue_capacity: usize,
        metrics: Option<Arc<ProxyMetrics>>,
    ) -> Self {
        let worker = ProxyWorker::spawn(queue_capacity, metrics.clone());
        Self::with_worker(router, worker, metrics)
    }

    /// Create the layer around an existing worker handle
    pub fn with_worker(
        router: PortRouter,
        worker: WorkerHandle,
        metrics: Option<Arc<ProxyMetrics>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                router,
                worker,
                metrics,
            }),
        }
    }

    pub fn router(&self) -> &PortRouter {
        &self.shared.router
    }

    /// Close every target's transport. Idempotent.
    pub fn shutdown(&self) {
        info!(targets = self.shared.router.len(), "Shutting down health check proxy");
        self.shared.router.close();
    }
}

impl<S> Layer<S> for HealthCheckProxyLayer {
    type Service = HealthCheckProxy<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HealthCheckProxy {
            inner,
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Service produced by [`HealthCheckProxyLayer`]
#[derive(Clone)]
pub struct HealthCheckProxy<S> {
    inner: S,
    shared: Arc<Shared>,
}

impl<S> Service<Request<Body>> for HealthCheckProxy<S>
where
    S: Service<Request<Body>, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let local_port = request.extensions().get::<LocalPort>().map(|p| p.0);
        let target = local_port.and_then(|port| self.shared.router.resolve(port).cloned());

        match (local_port, target) {
            (Some(port), Some(target)) => {
                let shared = Arc::clone(&self.shared);
                let path = request.uri().path().to_owned();
                Box::pin(async move {
                    let response = shared.intercept(port, &path, target).await;
                    Ok::<_, S::Error>(response)
                })
            }
            _ => Box::pin(self.inner.call(request)),
        }
    }
}

impl Shared {
    async fn intercept(&self, port: u16, path: &str, target: Arc<TargetClient>) -> Response {
        if path != HEALTH_CHECK_PATH {
            debug!(port, path, "Rejecting non health check path on proxy port");
            self.record(port, RequestOutcome::NotFound);
            return status_only(StatusCode::NOT_FOUND);
        }

        let deadline = target.timeout() + RESPONSE_WRITE_SLACK;
        let target_port = target.port();

        match tokio::time::timeout(deadline, self.worker.submit(target)).await {
            Ok(Some(snapshot)) => {
                self.record(port, RequestOutcome::Proxied);
                snapshot_response(&snapshot, target_port)
            }
            Ok(None) => {
                debug!(port, "Health check proxy worker is not running");
                self.record(port, RequestOutcome::Unavailable);
                status_only(StatusCode::SERVICE_UNAVAILABLE)
            }
            Err(_) => {
                debug!(port, target_port, ?deadline, "Original request timeout");
                self.record(port, RequestOutcome::Timeout);
                status_only(StatusCode::GATEWAY_TIMEOUT)
            }
        }
    }

    fn record(&self, port: u16, outcome: RequestOutcome) {
        if let Some(ref m) = self.metrics {
            m.record_request(port, outcome);
        }
    }
}

fn status_only(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

/// Render a snapshot as the response to the original caller
fn snapshot_response(snapshot: &StatusSnapshot, target_port: u16) -> Response {
    let body = snapshot
        .body()
        .map(|bytes| Body::from(bytes.clone()))
        .unwrap_or_else(Body::empty);

    let mut response = Response::new(body);
    *response.status_mut() = snapshot.status();

    let headers = response.headers_mut();
    if let Some(content_type) = snapshot.content_type() {
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
    }
    headers.insert(
        HeaderName::from_static(PROXY_TARGET_HEADER),
        HeaderValue::from(target_port),
    );

    response
}
