//! # groupchat-server
//!
//! Real-time fan-out for group chat channels.
//!
//! - [`websocket::connection`]: one live client, its bounded mailbox and delivery loop
//! - [`websocket::hub`]: channel registry with snapshot broadcast and slow-consumer eviction
//! - [`websocket::session`]: handshake, read loop and teardown for one connection
//! - [`server`]: axum router (`/api/v1/chat/{channel_id}`, `/health`, `/metrics`) and lifecycle
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use context::{ChatContext, Collaborators};
pub use server::{ChatServer, ServerHandle};
pub use shutdown::ShutdownCoordinator;
pub use websocket::connection::ClientConnection;
pub use websocket::hub::{BroadcastReport, ChannelRegistry};
pub use websocket::session::{ConnectionHandler, HandshakeError};
