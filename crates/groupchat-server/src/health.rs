//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Channels with at least one live connection.
    pub channels: usize,
    /// Live WebSocket connections across all channels.
    pub connections: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, channels: usize, connections: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        channels,
        connections,
    }
}
