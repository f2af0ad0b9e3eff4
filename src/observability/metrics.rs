//! Metrics collection and exposition.
//!
//! # Metrics
//! - `mqtt_proxy_connections_total` (counter): accepted connections by listener
//! - `mqtt_proxy_active_connections` (gauge): current connection count by listener
//! - `mqtt_proxy_auth_denied_total` (counter): rejected actions by kind
//! - `mqtt_proxy_forwarded_total` (counter): packets relayed upstream by kind
//!
//! Without an installed exporter every call is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter's HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn connection_opened(listener: &'static str) {
    metrics::counter!("mqtt_proxy_connections_total", "listener" => listener).increment(1);
    metrics::gauge!("mqtt_proxy_active_connections", "listener" => listener).increment(1.0);
}

pub fn connection_closed(listener: &'static str) {
    metrics::gauge!("mqtt_proxy_active_connections", "listener" => listener).decrement(1.0);
}

/// Record an action refused by the handler (`connect`, `publish`, `subscribe`).
pub fn auth_denied(action: &'static str) {
    metrics::counter!("mqtt_proxy_auth_denied_total", "action" => action).increment(1);
}

/// Record a packet forwarded to the upstream broker.
pub fn forwarded(packet: &'static str) {
    metrics::counter!("mqtt_proxy_forwarded_total", "packet" => packet).increment(1);
}
