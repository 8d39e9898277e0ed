//! Health check proxy server binary

use anyhow::Context;
use healthcheck_proxy::{
    EnvIdentityProvider, HealthCheckProxyLayer, IdentityProvider, PortRouter, ProxyMetrics,
};
use healthcheck_proxy_server::{Config, HostServer, MetricsServer, setup_tracing};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing is not initialized yet; configuration errors go to stderr via anyhow
    let config = match std::env::args_os().nth(1) {
        Some(path) => Config::load_from_file(PathBuf::from(path)),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    let _telemetry_guard = setup_tracing(
        &config.telemetry.service_name,
        &config.telemetry.otlp_endpoint,
        config.telemetry.enabled,
        config.log_level(),
        config.logging.format.as_deref(),
    )?;

    info!(listeners = config.listeners.len(), "Health check proxy server starting");

    let identity: Box<dyn IdentityProvider> = match config.node_identity() {
        Some(identity) => Box::new(identity),
        None => Box::new(EnvIdentityProvider::from_env()?),
    };

    let metrics = config
        .metrics
        .enabled
        .then(|| Arc::new(ProxyMetrics::new()));

    let router = PortRouter::build(
        &config.to_listener_descriptors(),
        identity.as_ref(),
        metrics.clone(),
    )?;
    let layer = HealthCheckProxyLayer::with_queue_capacity(
        router,
        config.proxy.queue_capacity,
        metrics.clone(),
    );

    let server = HostServer::bind(&config, layer).await?;
    let shutdown = CancellationToken::new();

    if let Some(metrics) = metrics {
        let metrics_server = MetricsServer::new(metrics, config.metrics.listen_addr.clone());
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics_server.run(shutdown).await {
                warn!(error = %e, "Metrics server error");
            }
        });
    }

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            shutdown.cancel();
        }
    });

    server.run(shutdown).await?;

    // Telemetry guard will flush spans on drop
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = term.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C");
    }
}
