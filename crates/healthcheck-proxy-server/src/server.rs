//! Host server owning every configured listener.
//!
//! Each accepted connection goes through the same stages: an optional PROXY
//! protocol header, optional TLS termination, then HTTP/1.1 or HTTP/2 served
//! by the application wrapped in the health check proxy layer. Every request
//! carries the [`LocalPort`] of the listener that accepted it.
//!
//! Everything before the first complete request is bounded by the handshake
//! timeout. Connections still open when the shutdown timeout expires are
//! dropped.

use crate::config::{Config, ListenerSettings, ServerSettings};
use crate::tls::server_config;
use axum::Router;
use axum::body::Body;
use axum::routing::get;
use common::{Error, Result};
use healthcheck_proxy::proxy_protocol::{self, PROXY_V1_PREFIX};
use healthcheck_proxy::{HEALTH_CHECK_PATH, HealthCheckProxyLayer, LocalPort, ProxyProtocolMode};
use http::Request;
use http::header::CONTENT_TYPE;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Longest wait for the first bytes of a mixed mode connection
const PROXY_PEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// The application served on every listener.
///
/// Answers the health check path itself so secured listeners have a real
/// endpoint for the proxy to forward to.
pub fn application() -> Router {
    Router::new().route(
        HEALTH_CHECK_PATH,
        get(|| async { ([(CONTENT_TYPE, "text/plain")], "OK") }),
    )
}

struct ListenerContext {
    port: u16,
    tls: Option<TlsAcceptor>,
    proxy_protocol: ProxyProtocolMode,
    handshake_timeout: Duration,
}

/// A connection ready to speak HTTP
enum AcceptedStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

struct BoundListener {
    listener: TcpListener,
    context: Arc<ListenerContext>,
}

/// Server bound to every configured listener
pub struct HostServer {
    listeners: Vec<BoundListener>,
    app: Router,
    layer: HealthCheckProxyLayer,
    shutdown_timeout: Duration,
}

impl HostServer {
    /// Bind every listener in `config` and load its TLS material
    pub async fn bind(config: &Config, layer: HealthCheckProxyLayer) -> Result<Self> {
        Self::bind_with_app(config, layer, application()).await
    }

    pub async fn bind_with_app(
        config: &Config,
        layer: HealthCheckProxyLayer,
        app: Router,
    ) -> Result<Self> {
        let mut listeners = Vec::with_capacity(config.listeners.len());

        for settings in &config.listeners {
            listeners.push(Self::bind_listener(&config.server, settings).await?);
        }

        Ok(Self {
            listeners,
            app,
            layer,
            shutdown_timeout: config.server.shutdown_timeout,
        })
    }

    async fn bind_listener(
        server: &ServerSettings,
        settings: &ListenerSettings,
    ) -> Result<BoundListener> {
        let port = settings.port;
        let tls = match settings.tls {
            Some(ref tls) => {
                let config = server_config(tls).map_err(|e| Error::listener(port, e))?;
                Some(TlsAcceptor::from(Arc::new(config)))
            }
            None => None,
        };

        let listener = TcpListener::bind((server.bind_address.as_str(), port))
            .await
            .map_err(|e| Error::listener(port, e))?;

        info!(
            port,
            tls = tls.is_some(),
            client_auth = %settings.tls.as_ref().map(|t| t.client_auth).unwrap_or_default(),
            proxy_protocol = settings.proxy_protocol.enabled,
            mixed_mode = settings.proxy_protocol.mixed_mode,
            "Listener bound"
        );

        Ok(BoundListener {
            listener,
            context: Arc::new(ListenerContext {
                port,
                tls,
                proxy_protocol: settings.proxy_protocol,
                handshake_timeout: server.handshake_timeout,
            }),
        })
    }

    /// Addresses actually bound, in configuration order
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.listener.local_addr().ok())
            .collect()
    }

    pub fn layer(&self) -> &HealthCheckProxyLayer {
        &self.layer
    }

    /// Serve until `shutdown` is cancelled.
    ///
    /// Stops accepting, gives open connections up to the shutdown timeout to
    /// finish, drops the rest, then closes the health check proxy.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let tracker = TaskTracker::new();
        let abort = CancellationToken::new();

        for bound in self.listeners {
            tracker.spawn(accept_loop(
                bound,
                self.app.clone(),
                self.layer.clone(),
                tracker.clone(),
                shutdown.clone(),
                abort.clone(),
            ));
        }

        info!("Health check proxy server running");
        shutdown.cancelled().await;

        info!(timeout = ?self.shutdown_timeout, "Shutdown requested, draining connections");
        tracker.close();
        if tokio::time::timeout(self.shutdown_timeout, tracker.wait())
            .await
            .is_err()
        {
            warn!("Connections still open after shutdown timeout, closing them");
            abort.cancel();
            tracker.wait().await;
        }

        self.layer.shutdown();
        info!("Health check proxy server stopped");
        Ok(())
    }
}

async fn accept_loop(
    bound: BoundListener,
    app: Router,
    layer: HealthCheckProxyLayer,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    abort: CancellationToken,
) {
    let port = bound.context.port;

    loop {
        let (stream, peer) = tokio::select! {
            accepted = bound.listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(port, error = %e, "Failed to accept connection");
                    continue;
                }
            },
            _ = shutdown.cancelled() => break,
        };

        let context = Arc::clone(&bound.context);
        let app = app.clone();
        let layer = layer.clone();
        let shutdown = shutdown.clone();
        let abort = abort.clone();
        tracker.spawn(async move {
            tokio::select! {
                result = serve_connection(stream, peer, context, app, layer, shutdown) => {
                    if let Err(e) = result {
                        warn!(port, %peer, error = %e, "Connection failed");
                    }
                }
                _ = abort.cancelled() => {
                    debug!(port, %peer, "Connection dropped after shutdown timeout");
                }
            }
        });
    }

    debug!(port, "Listener stopped accepting");
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<ListenerContext>,
    app: Router,
    layer: HealthCheckProxyLayer,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let port = context.port;
    let _ = stream.set_nodelay(true);

    let handshake = tokio::time::timeout(
        context.handshake_timeout,
        accept_stream(stream, peer, &context),
    );
    let accepted = tokio::select! {
        result = handshake => match result {
            Ok(accepted) => accepted?,
            Err(_) => {
                debug!(
                    port,
                    %peer,
                    timeout = ?context.handshake_timeout,
                    "Connection handshake timed out"
                );
                return Ok(());
            }
        },
        _ = shutdown.cancelled() => {
            debug!(port, %peer, "Connection closed during handshake on shutdown");
            return Ok(());
        }
    };

    let header_timeout = context.handshake_timeout;
    match accepted {
        AcceptedStream::Plain(stream) => {
            serve_http(stream, port, header_timeout, app, layer, shutdown).await
        }
        AcceptedStream::Tls(tls) => {
            serve_http(*tls, port, header_timeout, app, layer, shutdown).await
        }
    }
}

/// Consume the PROXY header if any, then terminate TLS if configured.
///
/// Plaintext connections are only handed over once their first byte arrives.
async fn accept_stream(
    mut stream: TcpStream,
    peer: SocketAddr,
    context: &ListenerContext,
) -> std::io::Result<AcceptedStream> {
    if expects_proxy_header(&stream, context.proxy_protocol).await? {
        let header = proxy_protocol::read_header(&mut stream).await?;
        debug!(port = context.port, %peer, source = ?header.source(), "PROXY header received");
    }

    match context.tls {
        Some(ref acceptor) => {
            let tls = acceptor.accept(stream).await?;
            Ok(AcceptedStream::Tls(Box::new(tls)))
        }
        None => {
            stream.peek(&mut [0u8; 1]).await?;
            Ok(AcceptedStream::Plain(stream))
        }
    }
}

/// Whether the connection starts with a PROXY header.
///
/// Mixed mode listeners accept both, so the first bytes decide.
async fn expects_proxy_header(
    stream: &TcpStream,
    mode: ProxyProtocolMode,
) -> std::io::Result<bool> {
    if !mode.enabled {
        return Ok(false);
    }
    if !mode.mixed_mode {
        return Ok(true);
    }

    tokio::time::timeout(PROXY_PEEK_TIMEOUT, starts_with_proxy_prefix(stream))
        .await
        .unwrap_or(Ok(false))
}

async fn starts_with_proxy_prefix(stream: &TcpStream) -> std::io::Result<bool> {
    let mut buf = [0u8; 6];
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 || buf[..n] != PROXY_V1_PREFIX[..n] {
            return Ok(false);
        }
        if n == PROXY_V1_PREFIX.len() {
            return Ok(true);
        }
        // Partial prefix: wait for more bytes to arrive
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

async fn serve_http<I>(
    io: I,
    port: u16,
    header_timeout: Duration,
    app: Router,
    layer: HealthCheckProxyLayer,
    shutdown: CancellationToken,
) -> std::io::Result<()>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(layer)
        .service(app);

    let hyper_service = hyper::service::service_fn(move |request: Request<Incoming>| {
        let mut request = request.map(Body::new);
        request.extensions_mut().insert(LocalPort(port));
        service.clone().oneshot(request)
    });

    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(header_timeout);
    builder.http2().timer(TokioTimer::new());
    let connection = builder.serve_connection(TokioIo::new(io), hyper_service);
    tokio::pin!(connection);

    let mut draining = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => return result.map_err(std::io::Error::other),
            _ = shutdown.cancelled(), if !draining => {
                draining = true;
                connection.as_mut().graceful_shutdown();
            }
        }
    }
}
