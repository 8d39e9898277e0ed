//! Error types for the health check proxy.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors, fatal while assembling the proxy
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("could not find any listener with port {0}")]
    MissingTarget(u16),

    #[error("health check proxy can only target an https port, but port {0} has no TLS")]
    TargetNotTls(u16),

    #[error(
        "node TLS identity is required when proxying health checks to port {0}, which needs client authentication"
    )]
    MissingNodeIdentity(u16),

    #[error("failed to read TLS configuration file {path}: {source}")]
    TlsConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TLS configuration file {path}: {source}")]
    TlsConfigFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures of a single forwarded request
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    #[error("HTTP exchange failed: {0}")]
    Http(#[from] hyper::Error),

    #[error("response body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("invalid request: {0}")]
    Request(#[from] http::Error),

    #[error("failed to load TLS material: {0}")]
    Identity(String),

    #[error("TLS configuration rejected: {0}")]
    Tls(#[from] rustls::Error),

    #[error("target client closed")]
    Closed,
}

impl ForwardError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ForwardError::Timeout(_))
    }
}
