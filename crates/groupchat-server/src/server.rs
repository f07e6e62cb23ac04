//! `ChatServer`: axum router, listener and lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use futures::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::context::{ChatContext, Collaborators};
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::hub::ChannelRegistry;
use crate::websocket::session::ConnectionHandler;

/// How long [`ServerHandle::shutdown`] waits for the listener and sessions.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Runs each upgraded connection.
    pub handler: ConnectionHandler,
    /// Live connections by channel.
    pub hub: Arc<ChannelRegistry>,
    /// Tracks each upgraded session until it ends.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus renderer, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Transport-level message ceiling.
    pub max_transport_frame_bytes: usize,
}

/// Query string of the chat upgrade request.
#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    /// Bearer credential.
    pub token: Option<String>,
}

/// The group chat server.
pub struct ChatServer {
    config: ServerConfig,
    handler: ConnectionHandler,
    hub: Arc<ChannelRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl ChatServer {
    /// Create a server over the given collaborators.
    pub fn new(config: ServerConfig, collaborators: Collaborators) -> Self {
        let hub = Arc::new(ChannelRegistry::with_eviction_threshold(
            config.eviction_threshold,
        ));
        let shutdown = Arc::new(ShutdownCoordinator::new(Arc::clone(&hub)));
        let ctx = ChatContext {
            hub: Arc::clone(&hub),
            collaborators,
            mailbox_capacity: config.mailbox_capacity,
            max_frame_bytes: config.max_frame_bytes,
            shutdown: shutdown.token(),
        };

        Self {
            config,
            handler: ConnectionHandler::new(Arc::new(ctx)),
            hub,
            shutdown,
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            handler: self.handler.clone(),
            hub: Arc::clone(&self.hub),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            max_transport_frame_bytes: self.config.max_transport_frame_bytes,
        };

        Router::new()
            .route("/api/v1/chat/{channel_id}", get(chat_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// The channel registry.
    pub fn hub(&self) -> &Arc<ChannelRegistry> {
        &self.hub
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind and start serving in the background.
    pub async fn listen(self) -> std::io::Result<ServerHandle> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, "chat server listening");

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });

        Ok(ServerHandle {
            addr,
            shutdown: self.shutdown,
            task,
        })
    }
}

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<ShutdownCoordinator>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The channel registry.
    pub fn hub(&self) -> &Arc<ChannelRegistry> {
        self.shutdown.hub()
    }

    /// Sessions still running.
    pub fn active_sessions(&self) -> usize {
        self.shutdown.active_sessions()
    }

    /// Stop accepting, close every connection and wait for the listener and
    /// the sessions. Returns `false` if the wait timed out.
    pub async fn shutdown(self) -> bool {
        info!("chat server shutting down");
        self.shutdown
            .graceful_shutdown(self.task, SHUTDOWN_TIMEOUT)
            .await
    }
}

/// GET /api/v1/chat/{channel_id}
async fn chat_handler(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Query(query): Query<ChatQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let handler = state.handler;
    let session = state.shutdown.track_session();
    ws.max_message_size(state.max_transport_frame_bytes)
        .max_frame_size(state.max_transport_frame_bytes)
        .on_upgrade(move |socket| handle_socket(handler, session, socket, channel_id, query.token))
}

async fn handle_socket(
    handler: ConnectionHandler,
    _session: TaskTrackerToken,
    socket: WebSocket,
    channel_id: String,
    token: Option<String>,
) {
    let (sink, stream) = socket.split();
    handler.run(sink, stream, channel_id, token).await;
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.channel_count(),
        state.hub.connection_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
