//! Mapping from inbound listener port to the target client serving it.

use crate::error::ProxyError;
use crate::metrics::ProxyMetrics;
use crate::target::TargetClient;
use crate::tls::{IdentityProvider, TlsPolicy};
use crate::types::{
    ClientAuth, HEALTH_CHECK_PATH, HealthCheckProxySettings, ListenerDescriptor, TargetDescriptor,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Immutable port to target mapping, built once at startup
#[derive(Default)]
pub struct PortRouter {
    targets: HashMap<u16, Arc<TargetClient>>,
}

impl PortRouter {
    /// Build the router from every configured listener.
    ///
    /// Fails if a proxied listener names a destination port that no listener
    /// binds, if the destination has no TLS, or if the destination needs
    /// client authentication and the node has no identity.
    pub fn build(
        listeners: &[ListenerDescriptor],
        identity: &dyn IdentityProvider,
        metrics: Option<Arc<ProxyMetrics>>,
    ) -> Result<Self, ProxyError> {
        let mut targets = HashMap::new();

        for listener in listeners {
            let Some(settings) = listener.health_check_proxy else {
                continue;
            };

            let target = Self::create_target(&settings, listeners, identity, metrics.clone())?;
            targets.insert(listener.port, Arc::new(target));

            info!(
                port = listener.port,
                target_port = settings.port,
                "Port {} is configured as a health check proxy for port {}. \
                 HTTP requests to '{}' on {} are proxied as HTTPS to {}.",
                listener.port,
                settings.port,
                HEALTH_CHECK_PATH,
                listener.port,
                settings.port
            );
        }

        Ok(Self { targets })
    }

    fn create_target(
        settings: &HealthCheckProxySettings,
        listeners: &[ListenerDescriptor],
        identity: &dyn IdentityProvider,
        metrics: Option<Arc<ProxyMetrics>>,
    ) -> Result<TargetClient, ProxyError> {
        let destination = listeners
            .iter()
            .find(|l| l.port == settings.port)
            .ok_or(ProxyError::MissingTarget(settings.port))?;

        let tls = destination.tls.ok_or(ProxyError::TargetNotTls(settings.port))?;
        let tls_policy = Self::select_tls_policy(settings.port, tls.client_auth, identity)?;

        let descriptor = TargetDescriptor {
            port: settings.port,
            timeout: settings.client_timeout,
            cache_expiry: settings.cache_expiry,
            proxy_protocol: destination.proxy_protocol.required(),
        };

        Ok(TargetClient::new(descriptor, tls_policy, metrics))
    }

    /// Pick the trust/identity policy for a destination listener
    pub fn select_tls_policy(
        port: u16,
        client_auth: ClientAuth,
        identity: &dyn IdentityProvider,
    ) -> Result<TlsPolicy, ProxyError> {
        if client_auth == ClientAuth::Need {
            let identity = identity
                .node_identity()
                .ok_or(ProxyError::MissingNodeIdentity(port))?;
            info!(
                port,
                "Port {} requires client certificate - client will provide its node certificate",
                port
            );
            Ok(TlsPolicy::ClientIdentity(identity))
        } else {
            info!(
                port,
                "Port {} does not require a client certificate - client will not provide a certificate",
                port
            );
            Ok(TlsPolicy::TrustAll)
        }
    }

    /// Target client for a listener port, if that port proxies health checks
    pub fn resolve(&self, port: u16) -> Option<&Arc<TargetClient>> {
        self.targets.get(&port)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Listener ports that proxy health checks
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.targets.keys().copied()
    }

    pub fn targets(&self) -> impl Iterator<Item = &Arc<TargetClient>> {
        self.targets.values()
    }

    /// Close every target client. Safe to call repeatedly.
    pub fn close(&self) {
        for target in self.targets.values() {
            target.close();
        }
    }
}
