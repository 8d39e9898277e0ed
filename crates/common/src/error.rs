//! Common error types for the healthcheck proxy components.

use std::fmt;

/// A specialized Result type for healthcheck proxy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for healthcheck proxy operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Listener error on port {port}: {message}")]
    Listener { port: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new TLS error.
    pub fn tls(msg: impl fmt::Display) -> Self {
        Error::Tls(msg.to_string())
    }

    /// Create a new listener error.
    pub fn listener(port: u16, msg: impl fmt::Display) -> Self {
        Error::Listener {
            port,
            message: msg.to_string(),
        }
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}
