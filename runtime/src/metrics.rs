//! Prometheus metrics for the cache, the orchestrator and the transport.
//!
//! Recording goes through the `metrics` facade, so nothing is collected until
//! a recorder is installed. [`MetricsServer`] installs the Prometheus one.
//!
//! # Example
//!
//! ```rust,no_run
//! use observable_request_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(body) = server.render() {
//!     println!("{body}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use observable_request_core::error::ApiErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics endpoint.
///
/// Owns the recorder handle; serving the rendered text over HTTP is left to
/// the embedding application.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address the embedding application will serve `/metrics` on
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by another test), this logs a
    /// warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Address the metrics are meant to be served on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Cache
    describe_counter!("cache_writes_total", "Total number of cache set/merge writes");
    describe_counter!(
        "cache_notifications_suppressed_total",
        "Writes whose notification was suppressed because nothing changed"
    );
    describe_counter!(
        "cache_evictions_total",
        "Entries removed because a read found them expired"
    );

    // Orchestrator
    describe_counter!(
        "requests_created_total",
        "Total number of executions that reached the transport"
    );
    describe_counter!(
        "requests_deduplicated_total",
        "Executions skipped because of a fresh cache entry or an in-flight call"
    );

    // Transport
    describe_counter!("transport_calls_total", "Total number of logical transport calls");
    describe_counter!(
        "transport_errors_total",
        "Transport calls that ended in an error, by kind"
    );
    describe_counter!(
        "transport_token_refreshes_total",
        "Credential refreshes triggered by an invalidating response"
    );
    describe_histogram!(
        "transport_call_duration_seconds",
        "Time taken by one logical transport call, retries included"
    );
}

/// Cache metrics recorder.
pub struct CacheMetrics;

impl CacheMetrics {
    /// Record a write.
    pub fn record_write() {
        counter!("cache_writes_total").increment(1);
    }

    /// Record a write whose notification was suppressed.
    pub fn record_suppressed() {
        counter!("cache_notifications_suppressed_total").increment(1);
    }

    /// Record a lazy eviction.
    pub fn record_eviction() {
        counter!("cache_evictions_total").increment(1);
    }
}

/// Orchestrator metrics recorder.
pub struct RequestMetrics;

impl RequestMetrics {
    /// Record an execution handed to the transport.
    pub fn record_created() {
        counter!("requests_created_total").increment(1);
    }

    /// Record an execution skipped by deduplication.
    pub fn record_deduplicated() {
        counter!("requests_deduplicated_total").increment(1);
    }
}

/// Transport metrics recorder.
pub struct TransportMetrics;

impl TransportMetrics {
    /// Record a finished call.
    pub fn record_call(duration: Duration) {
        counter!("transport_calls_total").increment(1);
        histogram!("transport_call_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed call.
    pub fn record_error(kind: ApiErrorKind) {
        counter!("transport_errors_total", "kind" => kind.as_str()).increment(1);
    }

    /// Record a credential refresh.
    pub fn record_refresh() {
        counter!("transport_token_refreshes_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
        assert_eq!(server.addr(), addr);
    }

    #[test]
    fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        CacheMetrics::record_write();
        CacheMetrics::record_suppressed();
        TransportMetrics::record_call(Duration::from_millis(20));
        TransportMetrics::record_error(ApiErrorKind::Timeout);

        // Another test may have installed the recorder first
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("cache_writes_total"));
            assert!(rendered.contains("cache_notifications_suppressed_total"));
            assert!(rendered.contains("transport_errors_total"));
            assert!(rendered.contains("kind=\"timeout\""));
        }
    }

    #[test]
    fn test_recorders_without_installed_recorder() {
        RequestMetrics::record_created();
        RequestMetrics::record_deduplicated();
        TransportMetrics::record_refresh();
        CacheMetrics::record_eviction();
    }
}
