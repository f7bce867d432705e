//! Prometheus metrics for the dispatch server

use crate::middleware::{Middleware, MiddlewareContext};
use anyhow::Result;
use prometheus::{Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tracing::debug;

/// Prometheus metrics collector for inbound requests
#[derive(Clone)]
pub struct MetricsCollector {
    /// HTTP requests received, by HTTP method
    pub http_requests_total: CounterVec,
    /// Decoded RPC calls, by RPC method name
    pub rpc_calls_total: CounterVec,
    /// HTTP responses by status code
    pub http_responses_total: CounterVec,
    /// Request handling latency in seconds
    pub request_duration_seconds: HistogramVec,
    /// Failed requests
    pub errors_total: Counter,
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let http_requests_total = CounterVec::new(
            Opts::new("samp_http_requests_total", "Total HTTP requests"),
            &["method"],
        )?;

        let rpc_calls_total = CounterVec::new(
            Opts::new("samp_rpc_calls_total", "Total RPC calls by method name"),
            &["rpc_method"],
        )?;

        let http_responses_total = CounterVec::new(
            Opts::new("samp_http_responses_total", "Total HTTP responses by status"),
            &["status"],
        )?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "samp_request_duration_seconds",
                "Request handling latency in seconds",
            ),
            &["method"],
        )?;

        let errors_total = Counter::new("samp_errors_total", "Total failed requests")?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(rpc_calls_total.clone()))?;
        registry.register(Box::new(http_responses_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;

        Ok(Self {
            http_requests_total,
            rpc_calls_total,
            http_responses_total,
            request_duration_seconds,
            errors_total,
            registry,
        })
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Records request, response and error metrics
pub struct MetricsMiddleware {
    pub collector: MetricsCollector,
}

impl MetricsMiddleware {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }
}

#[async_trait::async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "MetricsMiddleware"
    }

    async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        self.collector
            .http_requests_total
            .with_label_values(&[&context.method])
            .inc();
        Ok(())
    }

    async fn on_response(&self, context: &MiddlewareContext, status: u16) -> Result<()> {
        debug!("Recording response metrics for {} {} -> {}", context.method, context.path, status);

        if let Some(rpc_method) = context.rpc_method() {
            self.collector
                .rpc_calls_total
                .with_label_values(&[&rpc_method])
                .inc();
        }

        self.collector
            .http_responses_total
            .with_label_values(&[&status.to_string()])
            .inc();

        self.collector
            .request_duration_seconds
            .with_label_values(&[&context.method])
            .observe(context.started.elapsed().as_secs_f64());

        Ok(())
    }

    async fn on_error(&self, context: &MiddlewareContext, error: &str) -> Result<()> {
        debug!("Recording error metrics for {} {}: {}", context.method, context.path, error);
        self.collector.errors_total.inc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::RPC_METHOD_KEY;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create collector");
        let metrics = collector.gather().expect("Failed to gather metrics");
        assert!(metrics.contains("samp_errors_total"));
    }

    #[test]
    fn test_metrics_collector_clone_shares_registry() {
        let collector = MetricsCollector::new().expect("Failed to create collector");
        let clone = collector.clone();
        clone.errors_total.inc();
        assert_eq!(collector.errors_total.get(), 1.0);
    }

    #[tokio::test]
    async fn test_metrics_middleware_records_rpc_method() {
        let collector = MetricsCollector::new().expect("Failed to create collector");
        let middleware = MetricsMiddleware::new(collector);
        let context = MiddlewareContext::new("POST", "/");

        middleware.on_request(&context).await.expect("on_request");
        context.set_metadata(RPC_METHOD_KEY, "samp.hub.notify");
        middleware.on_response(&context, 200).await.expect("on_response");

        let metrics = middleware.collector.gather().expect("Failed to gather metrics");
        assert!(metrics.contains("samp_http_requests_total{method=\"POST\"} 1"));
        assert!(metrics.contains("samp_rpc_calls_total{rpc_method=\"samp.hub.notify\"} 1"));
        assert!(metrics.contains("samp_http_responses_total{status=\"200\"} 1"));
        assert!(metrics.contains("samp_request_duration_seconds"));
    }

    #[tokio::test]
    async fn test_metrics_middleware_on_error() {
        let collector = MetricsCollector::new().expect("Failed to create collector");
        let middleware = MetricsMiddleware::new(collector);
        let context = MiddlewareContext::new("POST", "/");

        middleware.on_error(&context, "Test error").await.expect("on_error");
        assert_eq!(middleware.collector.errors_total.get(), 1.0);
    }
}
