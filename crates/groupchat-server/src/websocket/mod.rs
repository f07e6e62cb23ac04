//! WebSocket connection management, channel fan-out and session lifecycle.

pub mod connection;
pub mod hub;
pub mod session;
