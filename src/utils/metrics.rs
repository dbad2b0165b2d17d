//! Observability and Metrics
//!
//! Driver-wide counters for connections, authentication and requests.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for driver operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections established (greeting accepted)
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Total authentication attempts
    pub auth_total: AtomicU64,
    /// Authentication attempts rejected by the server
    pub auth_failed: AtomicU64,
    /// Total requests sent
    pub requests_sent: AtomicU64,
    /// Total responses received
    pub responses_received: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Total bytes received
    pub bytes_received: AtomicU64,
    /// Responses carrying a server error code
    pub server_errors: AtomicU64,
    /// Framing, greeting or decoding failures
    pub protocol_errors: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            auth_total: AtomicU64::new(0),
            auth_failed: AtomicU64::new(0),
            requests_sent: AtomicU64::new(0),
            responses_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an authentication attempt
    pub fn auth_attempt(&self) {
        self.auth_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected authentication
    pub fn auth_rejected(&self) {
        self.auth_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request sent
    pub fn request_sent(&self, byte_count: u64) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a response received
    pub fn response_received(&self, byte_count: u64) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a server-reported failure
    pub fn server_error(&self) {
        self.server_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a protocol error
    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            auth_total: self.auth_total.load(Ordering::Relaxed),
            auth_failed: self.auth_failed.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            auth_total = snapshot.auth_total,
            auth_failed = snapshot.auth_failed,
            requests_sent = snapshot.requests_sent,
            responses_received = snapshot.responses_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            server_errors = snapshot.server_errors,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Driver metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub auth_total: u64,
    pub auth_failed: u64,
    pub requests_sent: u64,
    pub responses_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub server_errors: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Timer for measuring request round trips
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}
