//! Forwarding client and status cache for one destination listener.

use crate::error::ForwardError;
use crate::metrics::ProxyMetrics;
use crate::snapshot::StatusSnapshot;
use crate::tls::TlsPolicy;
use crate::transport::Transport;
use crate::types::{HEALTH_CHECK_PATH, TargetDescriptor};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Performs forwarded health checks against one destination and caches the result.
///
/// The transport is created on first use, never before: the destination's
/// TLS material may not exist until the host server has started.
///
/// Concurrent callers that find an expired snapshot may each issue a
/// forwarded request. The last one to finish wins the snapshot slot.
pub struct TargetClient {
    descriptor: TargetDescriptor,
    tls_policy: TlsPolicy,
    transport: OnceCell<Transport>,
    last_status: ArcSwapOption<StatusSnapshot>,
    transport_builds: AtomicU32,
    shutdown: CancellationToken,
    metrics: Option<Arc<ProxyMetrics>>,
}

impl TargetClient {
    /// Create a new target client
    pub fn new(
        descriptor: TargetDescriptor,
        tls_policy: TlsPolicy,
        metrics: Option<Arc<ProxyMetrics>>,
    ) -> Self {
        Self {
            descriptor,
            tls_policy,
            transport: OnceCell::new(),
            last_status: ArcSwapOption::empty(),
            transport_builds: AtomicU32::new(0),
            shutdown: CancellationToken::new(),
            metrics,
        }
    }

    pub fn descriptor(&self) -> &TargetDescriptor {
        &self.descriptor
    }

    /// Destination listener port
    pub fn port(&self) -> u16 {
        self.descriptor.port
    }

    pub fn timeout(&self) -> Duration {
        self.descriptor.timeout
    }

    pub fn tls_policy(&self) -> &TlsPolicy {
        &self.tls_policy
    }

    /// Number of transports constructed so far (0 or 1)
    pub fn transport_builds(&self) -> u32 {
        self.transport_builds.load(Ordering::Relaxed)
    }

    /// Current snapshot, expired or not
    pub fn cached(&self) -> Option<Arc<StatusSnapshot>> {
        self.last_status.load_full()
    }

    /// Status of the destination's health check endpoint.
    ///
    /// Served from cache while the last snapshot is younger than the cache
    /// expiry. Never fails: errors are turned into snapshots.
    pub async fn fetch(&self) -> Arc<StatusSnapshot> {
        if let Some(snapshot) = self.last_status.load_full() {
            if !snapshot.is_expired(self.descriptor.cache_expiry) {
                if let Some(ref m) = self.metrics {
                    m.record_cache_hit(self.descriptor.port);
                }
                return snapshot;
            }
        }

        let snapshot = Arc::new(self.request_status().await);
        self.last_status.store(Some(Arc::clone(&snapshot)));
        snapshot
    }

    async fn request_status(&self) -> StatusSnapshot {
        let port = self.descriptor.port;
        let start = Instant::now();

        let result = match self.transport().await {
            Ok(transport) => transport.get(port, HEALTH_CHECK_PATH).await,
            Err(e) => Err(e),
        };

        let (label, snapshot) = match result {
            Ok(response) => (
                "ok",
                StatusSnapshot::from_response(response.status, response.media_type, response.body),
            ),
            Err(e) if e.is_timeout() => {
                debug!(port, error = %e, "Proxy request timeout");
                ("timeout", StatusSnapshot::timeout())
            }
            Err(e) => {
                debug!(port, error = %e, "Proxy request failed");
                ("error", StatusSnapshot::failure(e.to_string()))
            }
        };

        if let Some(ref m) = self.metrics {
            m.record_forward(port, label, start.elapsed());
        }

        snapshot
    }

    async fn transport(&self) -> Result<&Transport, ForwardError> {
        if self.shutdown.is_cancelled() {
            return Err(ForwardError::Closed);
        }

        self.transport
            .get_or_try_init(|| async {
                let transport = Transport::build(
                    &self.tls_policy,
                    self.descriptor.timeout,
                    self.descriptor.proxy_protocol,
                    self.shutdown.child_token(),
                )?;

                self.transport_builds.fetch_add(1, Ordering::Relaxed);
                if let Some(ref m) = self.metrics {
                    m.record_transport_build(self.descriptor.port);
                }
                debug!(
                    port = self.descriptor.port,
                    client_identity = self.tls_policy.presents_identity(),
                    proxy_protocol = self.descriptor.proxy_protocol,
                    "Created health check proxy transport"
                );

                Ok::<_, ForwardError>(transport)
            })
            .await
    }

    /// Close the transport, if one was created, and refuse further forwarding.
    ///
    /// Idempotent.
    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        if let Some(transport) = self.transport.get() {
            transport.close();
            info!(port = self.descriptor.port, "Closed health check proxy transport");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(port: u16) -> TargetDescriptor {
        TargetDescriptor {
            port,
            timeout: Duration::from_millis(500),
            cache_expiry: Duration::from_secs(60),
            proxy_protocol: false,
        }
    }

    #[tokio::test]
    async fn test_close_before_first_use() {
        let client = TargetClient::new(descriptor(1), TlsPolicy::TrustAll, None);
        client.close();
        client.close();
        assert!(client.is_closed());

        let snapshot = client.fetch().await;
        assert_eq!(snapshot.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            snapshot.body().map(|b| b.as_ref()),
            Some(&b"target client closed"[..])
        );
        assert_eq!(client.transport_builds(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_cached_until_expiry() {
        let client = TargetClient::new(descriptor(1), TlsPolicy::TrustAll, None);
        client.close();

        let first = client.fetch().await;
        let second = client.fetch().await;
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_transport_build_failure_is_retried() {
        let policy = TlsPolicy::ClientIdentity(crate::tls::NodeIdentity {
            private_key: "/nonexistent/key.pem".into(),
            certificates: "/nonexistent/cert.pem".into(),
        });
        let mut desc = descriptor(1);
        desc.cache_expiry = Duration::ZERO;
        let client = TargetClient::new(desc, policy, None);

        let snapshot = client.fetch().await;
        assert_eq!(snapshot.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(snapshot.content_type(), Some("text/plain"));
        assert_eq!(client.transport_builds(), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        let again = client.fetch().await;
        assert!(!Arc::ptr_eq(&snapshot, &again));
        assert_eq!(client.transport_builds(), 0);
    }
}
