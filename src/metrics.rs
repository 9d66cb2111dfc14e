//! Metric helpers for the gateway.
//!
//! Thin wrappers over the `metrics` crate macros. No exporter is installed
//! here; the embedding application may register any compatible recorder.
//!
//! Provided metrics:
//! * `fleet_gateway_connections_received_total` (counter)
//! * `fleet_gateway_connections_failed_total` (counter, label `reason`)
//! * `fleet_gateway_connections_successful_total` (counter, label `protocol`)
//! * `fleet_gateway_connections_connecting` (gauge)
//! * `fleet_gateway_connections_connected` (gauge)
//! * `fleet_gateway_detection_duration_seconds` (histogram, label `outcome`)
//! * `fleet_gateway_http_requests_total` (counter)
//! * `fleet_gateway_http_request_duration_seconds` (histogram)
//! * `fleet_gateway_backend_requests_total` (counter)
//! * `fleet_gateway_backend_request_duration_seconds` (histogram)
//! * `fleet_gateway_registered_paths` (gauge)
//! * `fleet_gateway_mapped_routes` (gauge)
//!
//! [`RequestTimer`] and [`BackendRequestTimer`] record on `Drop` so early
//! returns are measured too.
use std::time::{Duration, Instant};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const CONNECTIONS_RECEIVED_TOTAL: &str = "fleet_gateway_connections_received_total";
pub const CONNECTIONS_FAILED_TOTAL: &str = "fleet_gateway_connections_failed_total";
pub const CONNECTIONS_SUCCESSFUL_TOTAL: &str = "fleet_gateway_connections_successful_total";
pub const CONNECTIONS_CONNECTING: &str = "fleet_gateway_connections_connecting";
pub const CONNECTIONS_CONNECTED: &str = "fleet_gateway_connections_connected";
pub const DETECTION_DURATION_SECONDS: &str = "fleet_gateway_detection_duration_seconds";
pub const HTTP_REQUESTS_TOTAL: &str = "fleet_gateway_http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "fleet_gateway_http_request_duration_seconds";
pub const BACKEND_REQUESTS_TOTAL: &str = "fleet_gateway_backend_requests_total";
pub const BACKEND_REQUEST_DURATION_SECONDS: &str =
    "fleet_gateway_backend_request_duration_seconds";
pub const REGISTERED_PATHS: &str = "fleet_gateway_registered_paths";
pub const MAPPED_ROUTES: &str = "fleet_gateway_mapped_routes";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        CONNECTIONS_RECEIVED_TOTAL,
        Unit::Count,
        "Connections accepted by detecting listeners."
    );
    describe_counter!(
        CONNECTIONS_FAILED_TOTAL,
        Unit::Count,
        "Connections rejected or timed out before proxying."
    );
    describe_counter!(
        CONNECTIONS_SUCCESSFUL_TOTAL,
        Unit::Count,
        "Connections spliced to a backend."
    );
    describe_gauge!(
        CONNECTIONS_CONNECTING,
        "Connections currently in protocol detection."
    );
    describe_gauge!(CONNECTIONS_CONNECTED, "Connections currently proxying.");
    describe_histogram!(
        DETECTION_DURATION_SECONDS,
        Unit::Seconds,
        "Time from accept until a detection outcome."
    );
    describe_counter!(
        HTTP_REQUESTS_TOTAL,
        Unit::Count,
        "HTTP requests handled by the gateway handler."
    );
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests handled by the gateway handler."
    );
    describe_counter!(
        BACKEND_REQUESTS_TOTAL,
        Unit::Count,
        "HTTP requests forwarded to backend services."
    );
    describe_histogram!(
        BACKEND_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests forwarded to backend services."
    );
    describe_gauge!(REGISTERED_PATHS, "Paths currently held by the service registry.");
    describe_gauge!(MAPPED_ROUTES, "Routes in the current HTTP routing table.");
});

/// Register metric descriptions (idempotent).
pub fn init_metrics() {
    Lazy::force(&DESCRIPTIONS);
    tracing::debug!("Gateway metric descriptions registered");
}

pub fn increment_connections_received() {
    counter!(CONNECTIONS_RECEIVED_TOTAL).increment(1);
}

/// `reason` is one of `rejected`, `timed_out`, `no_backend`, `backend_unreachable`, `tls`.
pub fn increment_connections_failed(reason: &'static str) {
    counter!(CONNECTIONS_FAILED_TOTAL, "reason" => reason).increment(1);
}

pub fn increment_connections_successful(protocol: &'static str) {
    counter!(CONNECTIONS_SUCCESSFUL_TOTAL, "protocol" => protocol).increment(1);
}

pub fn set_connecting(count: usize) {
    gauge!(CONNECTIONS_CONNECTING).set(count as f64);
}

pub fn set_connected(count: usize) {
    gauge!(CONNECTIONS_CONNECTED).set(count as f64);
}

pub fn record_detection_duration(outcome: &'static str, duration: Duration) {
    histogram!(DETECTION_DURATION_SECONDS, "outcome" => outcome).record(duration.as_secs_f64());
}

/// Count a handled HTTP request by route prefix.
pub fn increment_http_request_total(prefix: &str, method: &str, status: u16) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "prefix" => prefix.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn increment_backend_request_total(backend: &str, method: &str, status: u16) {
    counter!(
        BACKEND_REQUESTS_TOTAL,
        "backend" => backend.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn set_registered_paths(count: usize) {
    gauge!(REGISTERED_PATHS).set(count as f64);
}

pub fn set_mapped_routes(count: usize) {
    gauge!(MAPPED_ROUTES).set(count as f64);
}

/// Records the HTTP request duration when dropped.
pub struct RequestTimer {
    start: Instant,
    method: String,
}

impl RequestTimer {
    pub fn new(method: &str) -> Self {
        Self {
            start: Instant::now(),
            method: method.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => self.method.clone())
            .record(self.start.elapsed().as_secs_f64());
    }
}

/// Records the backend round trip duration when dropped.
pub struct BackendRequestTimer {
    start: Instant,
    backend: String,
}

impl BackendRequestTimer {
    pub fn new(backend: &str) -> Self {
        Self {
            start: Instant::now(),
            backend: backend.to_string(),
        }
    }
}

impl Drop for BackendRequestTimer {
    fn drop(&mut self) {
        histogram!(BACKEND_REQUEST_DURATION_SECONDS, "backend" => self.backend.clone())
            .record(self.start.elapsed().as_secs_f64());
    }
}
