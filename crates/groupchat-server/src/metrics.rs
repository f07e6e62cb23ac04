//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Without an installed
/// recorder every metric macro is a no-op.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections registered in a channel (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections torn down (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Handshakes refused before registration (counter, labels: reason).
pub const WS_HANDSHAKE_REJECTIONS_TOTAL: &str = "ws_handshake_rejections_total";
/// Chat messages persisted and broadcast (counter).
pub const CHAT_MESSAGES_TOTAL: &str = "chat_messages_total";
/// Inbound frames rejected (counter, labels: reason).
pub const CHAT_MESSAGES_REJECTED_TOTAL: &str = "chat_messages_rejected_total";
/// Broadcast enqueue attempts that found a full mailbox (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Connections evicted as persistently slow (counter).
pub const WS_EVICTIONS_TOTAL: &str = "ws_evictions_total";
