//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define channel and session metrics
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `socket_channels_opened_total` (counter): channels started
//! - `socket_channels_closed_total` (counter): channels closed, by reason
//! - `socket_active_channels` (gauge): channels between start and close
//! - `socket_bytes_received_total` / `socket_bytes_sent_total` (counter)
//! - `socket_packages_received_total` (counter): packages produced by filters
//! - `websocket_sessions_opened_total` (counter): completed handshakes
//! - `websocket_protocol_errors_total` (counter): rejected frames or handshakes
//!
//! # Design Decisions
//! - Recording without an installed recorder is a no-op, so library users
//!   and tests pay nothing
//! - Labels only where the value set is small and fixed (close reason)

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::channel::CloseReason;

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_channel_opened() {
    counter!("socket_channels_opened_total").increment(1);
    gauge!("socket_active_channels").increment(1.0);
}

pub fn record_channel_closed(reason: CloseReason) {
    counter!("socket_channels_closed_total", "reason" => reason.as_str()).increment(1);
    gauge!("socket_active_channels").decrement(1.0);
}

pub fn record_bytes_received(n: usize) {
    counter!("socket_bytes_received_total").increment(n as u64);
}

pub fn record_bytes_sent(n: usize) {
    counter!("socket_bytes_sent_total").increment(n as u64);
}

pub fn record_package_received() {
    counter!("socket_packages_received_total").increment(1);
}

pub fn record_session_opened() {
    counter!("websocket_sessions_opened_total").increment(1);
}

/// `kind` is a short static tag such as `"frame"` or `"handshake"`.
pub fn record_protocol_error(kind: &'static str) {
    counter!("websocket_protocol_errors_total", "kind" => kind).increment(1);
}
