//! Prometheus metrics for the health check proxy.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::time::Duration;

/// Labels for inbound request metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// Listener port the request arrived on
    pub port: String,
    /// Outcome (proxied, not_found, timeout, unavailable)
    pub outcome: String,
}

/// Labels for forwarded request metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ForwardLabels {
    /// Destination listener port
    pub target_port: String,
    /// Result (ok, timeout, error)
    pub result: String,
}

/// Labels for per-target metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TargetLabels {
    /// Destination listener port
    pub target_port: String,
}

/// How an intercepted request was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Proxied,
    NotFound,
    Timeout,
    Unavailable,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::Proxied => "proxied",
            RequestOutcome::NotFound => "not_found",
            RequestOutcome::Timeout => "timeout",
            RequestOutcome::Unavailable => "unavailable",
        }
    }
}

/// Metrics registry with all health check proxy metrics
pub struct ProxyMetrics {
    /// Prometheus registry
    pub registry: Registry,

    requests_total: Family<RequestLabels, Counter>,
    forwarded_total: Family<ForwardLabels, Counter>,
    cache_hits_total: Family<TargetLabels, Counter>,
    forward_duration_seconds: Family<TargetLabels, Histogram>,
    transport_builds_total: Family<TargetLabels, Counter>,
    queue_depth: Gauge,
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "healthcheck_proxy_requests",
            "Intercepted requests by listener port and outcome",
            requests_total.clone(),
        );

        let forwarded_total = Family::<ForwardLabels, Counter>::default();
        registry.register(
            "healthcheck_proxy_forwarded",
            "Forwarded health check requests by destination and result",
            forwarded_total.clone(),
        );

        let cache_hits_total = Family::<TargetLabels, Counter>::default();
        registry.register(
            "healthcheck_proxy_cache_hits",
            "Health checks answered from the cached status",
            cache_hits_total.clone(),
        );

        let forward_duration_seconds = Family::<TargetLabels, Histogram>::new_with_constructor(|| {
            // 1ms to ~16s
            Histogram::new(exponential_buckets(0.001, 2.0, 15))
        });
        registry.register(
            "healthcheck_proxy_forward_duration_seconds",
            "Duration of forwarded health check requests",
            forward_duration_seconds.clone(),
        );

        let transport_builds_total = Family::<TargetLabels, Counter>::default();
        registry.register(
            "healthcheck_proxy_transport_builds",
            "Transports constructed per destination",
            transport_builds_total.clone(),
        );

        let queue_depth = Gauge::default();
        registry.register(
            "healthcheck_proxy_queue_depth",
            "Forwarding jobs waiting for the worker",
            queue_depth.clone(),
        );

        Self {
            registry,
            requests_total,
            forwarded_total,
            cache_hits_total,
            forward_duration_seconds,
            transport_builds_total,
            queue_depth,
        }
    }

    pub fn record_request(&self, port: u16, outcome: RequestOutcome) {
        self.requests_total
            .get_or_create(&RequestLabels {
                port: port.to_string(),
                outcome: outcome.as_str().to_string(),
            })
            .inc();
    }

    pub fn record_forward(&self, target_port: u16, result: &str, duration: Duration) {
        self.forwarded_total
            .get_or_create(&ForwardLabels {
                target_port: target_port.to_string(),
                result: result.to_string(),
            })
            .inc();
        self.forward_duration_seconds
            .get_or_create(&TargetLabels {
                target_port: target_port.to_string(),
            })
            .observe(duration.as_secs_f64());
    }

    pub fn record_cache_hit(&self, target_port: u16) {
        self.cache_hits_total
            .get_or_create(&TargetLabels {
                target_port: target_port.to_string(),
            })
            .inc();
    }

    pub fn record_transport_build(&self, target_port: u16) {
        self.transport_builds_total
            .get_or_create(&TargetLabels {
                target_port: target_port.to_string(),
            })
            .inc();
    }

    pub fn job_enqueued(&self) {
        self.queue_depth.inc();
    }

    /// A job left the queue, either picked up by the worker or never delivered
    pub fn job_started(&self) {
        self.queue_depth.dec();
    }

    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn test_metrics_encode() {
        let metrics = ProxyMetrics::new();
        metrics.record_request(8080, RequestOutcome::Proxied);
        metrics.record_request(8080, RequestOutcome::NotFound);
        metrics.record_forward(8443, "ok", Duration::from_millis(12));
        metrics.record_cache_hit(8443);
        metrics.record_transport_build(8443);
        metrics.job_enqueued();

        let mut buffer = String::new();
        encode(&mut buffer, &metrics.registry).unwrap();

        assert!(buffer.contains("healthcheck_proxy_requests_total{port=\"8080\",outcome=\"proxied\"} 1"));
        assert!(buffer.contains("healthcheck_proxy_forwarded_total{target_port=\"8443\",result=\"ok\"} 1"));
        assert!(buffer.contains("healthcheck_proxy_cache_hits_total{target_port=\"8443\"} 1"));
        assert!(buffer.contains("healthcheck_proxy_queue_depth 1"));
    }
}
