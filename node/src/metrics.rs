//! # Prometheus Metrics
//!
//! Operational metrics for the kernel node, scraped by Prometheus at the
//! `/metrics` endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] with
//! the `pfta` prefix so they do not collide with any default global
//! registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
///
/// Prometheus handles are reference counted internally, so clones share
/// the same series.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Successful vault deposits.
    pub deposits_total: IntCounter,
    /// Successful vault releases, direct or through the scheduler.
    pub releases_total: IntCounter,
    /// Payments recorded by the scheduler.
    pub payments_scheduled_total: IntCounter,
    /// Payments executed by the scheduler.
    pub payments_executed_total: IntCounter,
    /// Kernel operations refused, labelled by error kind.
    pub rejected_operations_total: IntCounterVec,
    /// Scheduled payments whose time gate is open, as of the last scan.
    pub payments_ready: IntGauge,
    /// Kernel operation latency in seconds, labelled by operation.
    pub operation_latency_seconds: HistogramVec,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("pfta".into()), None)?;

        let deposits_total = IntCounter::new("deposits_total", "Total number of vault deposits")?;
        registry.register(Box::new(deposits_total.clone()))?;

        let releases_total = IntCounter::new("releases_total", "Total number of vault releases")?;
        registry.register(Box::new(releases_total.clone()))?;

        let payments_scheduled_total = IntCounter::new(
            "payments_scheduled_total",
            "Total number of payments recorded by the scheduler",
        )?;
        registry.register(Box::new(payments_scheduled_total.clone()))?;

        let payments_executed_total = IntCounter::new(
            "payments_executed_total",
            "Total number of scheduled payments executed",
        )?;
        registry.register(Box::new(payments_executed_total.clone()))?;

        let rejected_operations_total = IntCounterVec::new(
            Opts::new(
                "rejected_operations_total",
                "Kernel operations refused, by error kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(rejected_operations_total.clone()))?;

        let payments_ready = IntGauge::new(
            "payments_ready",
            "Scheduled payments whose time gate has opened",
        )?;
        registry.register(Box::new(payments_ready.clone()))?;

        let operation_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Kernel operation latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            deposits_total,
            releases_total,
            payments_scheduled_total,
            payments_executed_total,
            rejected_operations_total,
            payments_ready,
            operation_latency_seconds,
        })
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_metrics_carry_prefix() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.deposits_total.inc();
        metrics
            .rejected_operations_total
            .with_label_values(&["authorization"])
            .inc();
        metrics
            .operation_latency_seconds
            .with_label_values(&["deposit"])
            .observe(0.002);

        let text = metrics.encode().unwrap();
        assert!(text.contains("pfta_deposits_total 1"));
        assert!(text.contains("pfta_rejected_operations_total{kind=\"authorization\"} 1"));
        assert!(text.contains("pfta_operation_latency_seconds_count{operation=\"deposit\"} 1"));
    }
}
