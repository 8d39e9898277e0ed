//! Resolved listener descriptors and shared constants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The only path that is proxied to the destination listener.
pub const HEALTH_CHECK_PATH: &str = "/status.html";

/// Response header naming the destination port that produced the response.
pub const PROXY_TARGET_HEADER: &str = "health-check-proxy-target";

/// User agent sent on forwarded requests.
pub const PROXY_USER_AGENT: &str = "health-check-proxy-client";

/// Extra time granted on top of the target timeout for writing the response.
pub const RESPONSE_WRITE_SLACK: Duration = Duration::from_secs(1);

/// Listener port a connection was accepted on.
///
/// The host server inserts this into every request's extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalPort(pub u16);

/// Client certificate requirement of a TLS listener
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientAuth {
    /// No client certificate is requested
    #[default]
    None,
    /// A client certificate is requested but not required
    Want,
    /// A valid client certificate is required
    Need,
}

impl fmt::Display for ClientAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientAuth::None => write!(f, "none"),
            ClientAuth::Want => write!(f, "want"),
            ClientAuth::Need => write!(f, "need"),
        }
    }
}

/// TLS settings of a listener, as far as the proxy cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerTls {
    pub client_auth: ClientAuth,
}

/// PROXY protocol settings of a listener
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyProtocolMode {
    #[serde(default)]
    pub enabled: bool,

    /// Accept both framed and unframed connections
    #[serde(default)]
    pub mixed_mode: bool,
}

impl ProxyProtocolMode {
    /// Whether forwarded connections to this listener must carry a PROXY header.
    ///
    /// Mixed mode is excluded: such a listener accepts unframed connections.
    pub fn required(&self) -> bool {
        self.enabled && !self.mixed_mode
    }
}

/// Health check proxy settings of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckProxySettings {
    /// Destination listener port
    pub port: u16,

    /// Timeout for the forwarded request
    pub client_timeout: Duration,

    /// How long a forwarded response may be served from cache
    pub cache_expiry: Duration,
}

/// A listener as resolved by the configuration layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerDescriptor {
    pub port: u16,
    pub tls: Option<ListenerTls>,
    pub proxy_protocol: ProxyProtocolMode,
    pub health_check_proxy: Option<HealthCheckProxySettings>,
}

impl ListenerDescriptor {
    /// Plaintext listener without proxying
    pub fn plain(port: u16) -> Self {
        Self {
            port,
            tls: None,
            proxy_protocol: ProxyProtocolMode::default(),
            health_check_proxy: None,
        }
    }

    /// TLS listener with the given client certificate requirement
    pub fn tls(port: u16, client_auth: ClientAuth) -> Self {
        Self {
            tls: Some(ListenerTls { client_auth }),
            ..Self::plain(port)
        }
    }

    pub fn with_proxy_protocol(mut self, mode: ProxyProtocolMode) -> Self {
        self.proxy_protocol = mode;
        self
    }

    pub fn with_health_check_proxy(mut self, settings: HealthCheckProxySettings) -> Self {
        self.health_check_proxy = Some(settings);
        self
    }
}

/// Everything a target client needs to know about its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDescriptor {
    /// Destination listener port
    pub port: u16,
    pub timeout: Duration,
    pub cache_expiry: Duration,
    /// Prepend a PROXY protocol v1 header to forwarded connections
    pub proxy_protocol: bool,
}

/// Convert fractional seconds from configuration into a duration.
///
/// Truncates to whole milliseconds; negative and non-finite values become zero.
pub fn duration_from_secs(secs: f64) -> Duration {
    if !secs.is_finite() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_millis((secs * 1000.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_protocol_required() {
        let off = ProxyProtocolMode::default();
        let on = ProxyProtocolMode {
            enabled: true,
            mixed_mode: false,
        };
        let mixed = ProxyProtocolMode {
            enabled: true,
            mixed_mode: true,
        };

        assert!(!off.required());
        assert!(on.required());
        assert!(!mixed.required());
    }

    #[test]
    fn test_duration_from_secs_truncates_to_millis() {
        assert_eq!(duration_from_secs(1.0), Duration::from_secs(1));
        assert_eq!(duration_from_secs(0.25), Duration::from_millis(250));
        assert_eq!(duration_from_secs(0.0015), Duration::from_millis(1));
        assert_eq!(duration_from_secs(-3.0), Duration::ZERO);
        assert_eq!(duration_from_secs(f64::NAN), Duration::ZERO);
    }

    #[test]
    fn test_client_auth_display() {
        assert_eq!(ClientAuth::None.to_string(), "none");
        assert_eq!(ClientAuth::Want.to_string(), "want");
        assert_eq!(ClientAuth::Need.to_string(), "need");
    }

    #[test]
    fn test_descriptor_builders() {
        let settings = HealthCheckProxySettings {
            port: 8443,
            client_timeout: Duration::from_secs(1),
            cache_expiry: Duration::from_secs(1),
        };
        let listener = ListenerDescriptor::plain(8080).with_health_check_proxy(settings);
        assert_eq!(listener.health_check_proxy, Some(settings));
        assert!(listener.tls.is_none());

        let tls = ListenerDescriptor::tls(8443, ClientAuth::Need);
        assert_eq!(tls.tls.map(|t| t.client_auth), Some(ClientAuth::Need));
    }
}
