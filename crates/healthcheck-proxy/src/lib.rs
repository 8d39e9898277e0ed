//! Port-scoped health check proxy.
//!
//! Health checkers often cannot speak TLS or present client certificates,
//! while the authoritative health signal lives behind a secured listener.
//! This crate provides a request pipeline component that intercepts
//! `/status.html` on configured plaintext (or auxiliary) listener ports and
//! forwards it over HTTPS to the real health endpoint on another port.
//!
//! # Components
//!
//! - **StatusSnapshot**: immutable cached result of a forwarded check
//! - **TargetClient**: lazily built TLS client for one destination, with
//!   a short-lived response cache
//! - **PortRouter**: immutable inbound port to target mapping, including
//!   the TLS trust/identity policy decision
//! - **HealthCheckProxyLayer**: tower layer intercepting requests, backed by
//!   a single shared forwarding worker
//!
//! # Example
//!
//! ```no_run
//! use healthcheck_proxy::{
//!     ClientAuth, HealthCheckProxyLayer, HealthCheckProxySettings, ListenerDescriptor, NoIdentity,
//!     PortRouter,
//! };
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let listeners = vec![
//!     ListenerDescriptor::plain(8080).with_health_check_proxy(HealthCheckProxySettings {
//!         port: 8443,
//!         client_timeout: Duration::from_secs(1),
//!         cache_expiry: Duration::from_secs(1),
//!     }),
//!     ListenerDescriptor::tls(8443, ClientAuth::None),
//! ];
//!
//! let router = PortRouter::build(&listeners, &NoIdentity, None)?;
//! let layer = HealthCheckProxyLayer::new(router, None);
//! let app = tower::Layer::layer(&layer, axum::Router::<()>::new());
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handler;
pub mod metrics;
pub mod proxy_protocol;
pub mod router;
pub mod snapshot;
pub mod target;
pub mod tls;
pub mod transport;
pub mod types;
pub mod worker;

pub use error::{ForwardError, ProxyError};
pub use handler::{HealthCheckProxy, HealthCheckProxyLayer};
pub use metrics::ProxyMetrics;
pub use proxy_protocol::ProxyHeaderV1;
pub use router::PortRouter;
pub use snapshot::StatusSnapshot;
pub use target::TargetClient;
pub use tls::{EnvIdentityProvider, IdentityProvider, NoIdentity, NodeIdentity, TlsPolicy};
pub use types::{
    ClientAuth, HEALTH_CHECK_PATH, HealthCheckProxySettings, ListenerDescriptor, ListenerTls,
    LocalPort, PROXY_TARGET_HEADER, ProxyProtocolMode, TargetDescriptor,
};
pub use worker::{ProxyWorker, WorkerHandle};
