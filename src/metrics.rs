use metrics::{Unit, counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::core::RelayReport;

pub const PORTICO_REQUESTS_TOTAL: &str = "portico_requests_total";
pub const PORTICO_REQUEST_DURATION_SECONDS: &str = "portico_request_duration_seconds";
pub const PORTICO_RELAY_BYTES_TOTAL: &str = "portico_relay_bytes_total";
pub const PORTICO_RELAY_SESSIONS_TOTAL: &str = "portico_relay_sessions_total";
pub const PORTICO_UPSTREAM_CONNECT_FAILURES_TOTAL: &str = "portico_upstream_connect_failures_total";

pub fn describe_metrics() {
    describe_counter!(
        PORTICO_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests handled by the gateway."
    );
    describe_histogram!(
        PORTICO_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Time from parsed request head to the end of the response or relay."
    );
    describe_counter!(
        PORTICO_RELAY_BYTES_TOTAL,
        Unit::Bytes,
        "Bytes relayed between clients and upstreams, by direction."
    );
    describe_counter!(
        PORTICO_RELAY_SESSIONS_TOTAL,
        Unit::Count,
        "Completed relay sessions, by how they ended."
    );
    describe_counter!(
        PORTICO_UPSTREAM_CONNECT_FAILURES_TOTAL,
        Unit::Count,
        "Failed attempts to open an upstream connection."
    );
}

/// Serve the Prometheus scrape endpoint on `addr`.
pub fn install_prometheus_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter on {addr}: {e}"))?;
    describe_metrics();
    Ok(())
}

pub fn increment_request_total(action: &str, method: &str, status: &str) {
    counter!(
        PORTICO_REQUESTS_TOTAL,
        "action" => action.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_request_duration(action: &str, method: &str, duration: Duration) {
    histogram!(
        PORTICO_REQUEST_DURATION_SECONDS,
        "action" => action.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_relay(report: &RelayReport) {
    counter!(PORTICO_RELAY_BYTES_TOTAL, "direction" => "client_to_upstream")
        .increment(report.client_to_upstream);
    counter!(PORTICO_RELAY_BYTES_TOTAL, "direction" => "upstream_to_client")
        .increment(report.upstream_to_client);
    counter!(PORTICO_RELAY_SESSIONS_TOTAL, "end" => report.end.as_str()).increment(1);
}

pub fn increment_upstream_connect_failure(upstream: &str) {
    counter!(
        PORTICO_UPSTREAM_CONNECT_FAILURES_TOTAL,
        "upstream" => upstream.to_string()
    )
    .increment(1);
}

// Helper struct for measuring duration easily using RAII
pub struct RequestTimer {
    start: Instant,
    action: &'static str,
    method: String,
}

impl RequestTimer {
    pub fn new(action: &'static str, method: &str) -> Self {
        Self {
            start: Instant::now(),
            action,
            method: method.to_string(),
        }
    }

    pub fn action(&self) -> &'static str {
        self.action
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(self.action, &self.method, self.start.elapsed());
    }
}
