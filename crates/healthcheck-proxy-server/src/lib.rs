//! Health check proxy host server
//!
//! Runs a set of HTTP listeners, plaintext or TLS, optionally behind the
//! PROXY protocol, and installs the health check proxy in front of the
//! application served on all of them. Plaintext ports configured as proxies
//! answer `/status.html` with the status of a secured port on the same node.
//!
//! # Components
//!
//! - **Config**: YAML configuration with validation
//! - **HostServer**: listener binding, PROXY header handling, TLS termination
//! - **MetricsServer**: Prometheus endpoint for the proxy metrics
//! - **Telemetry**: tracing subscriber setup, optionally exporting to OTLP

pub mod config;
pub mod http_server;
pub mod server;
pub mod telemetry;
pub mod tls;

pub use config::{Config, ConfigError};
pub use http_server::MetricsServer;
pub use server::{HostServer, application};
pub use telemetry::{TelemetryGuard, init_telemetry, setup_tracing};
