//! # groupchat
//!
//! Group chat server binary: loads settings, opens the store and serves
//! channel WebSockets until interrupted.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use groupchat_auth::JwtVerifier;
use groupchat_server::{ChatServer, Collaborators, ServerConfig};
use groupchat_settings::GroupchatSettings;
use groupchat_store::{ChatService, Database};
use groupchat_telemetry::{TelemetryConfig, init_telemetry};

/// Real-time group chat server.
#[derive(Parser, Debug)]
#[command(name = "groupchat", about = "Real-time group chat server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// `SQLite` database path, or `:memory:` (overrides settings).
    #[arg(long)]
    db_path: Option<String>,

    /// Settings file (defaults to `~/.groupchat/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Cli {
    fn apply(self, settings: &mut GroupchatSettings) {
        if let Some(host) = self.host {
            settings.server.host = host;
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(db_path) = self.db_path {
            settings.server.db_path = db_path;
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn open_database(settings: &GroupchatSettings) -> Result<Database> {
    if settings.server.is_in_memory_db() {
        tracing::warn!("using in-memory database, messages will not survive a restart");
        return Database::in_memory().context("Failed to open in-memory database");
    }
    let path = settings
        .server
        .resolved_db_path(&groupchat_settings::data_dir());
    ensure_parent_dir(&path)?;
    Database::open(&path)
        .with_context(|| format!("Failed to open database at {}", path.display()))
}

fn server_config(settings: &GroupchatSettings) -> ServerConfig {
    ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        mailbox_capacity: settings.chat.mailbox_capacity,
        eviction_threshold: settings.chat.eviction_threshold,
        max_frame_bytes: settings.chat.max_frame_bytes,
        max_transport_frame_bytes: settings.chat.max_transport_frame_bytes,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(groupchat_settings::settings_path);
    let mut settings = groupchat_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    init_telemetry(&TelemetryConfig::from_level_str(
        &settings.logging.level,
        settings.logging.json,
    ))
    .context("Failed to initialize logging")?;

    let secret = settings
        .require_jwt_secret()
        .context("Refusing to start without a signing secret")?;

    let metrics = groupchat_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let db = open_database(&settings)?;
    let service = Arc::new(ChatService::new(db));
    let collaborators = Collaborators {
        auth: Arc::new(JwtVerifier::new(secret.as_bytes())),
        membership: service.clone(),
        store: service,
    };

    let handle = ChatServer::new(server_config(&settings), collaborators)
        .with_metrics(metrics)
        .listen()
        .await
        .context("Failed to start server")?;

    tracing::info!(addr = %handle.local_addr(), "groupchat server ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    if !handle.shutdown().await {
        tracing::warn!("some sessions were still running at exit");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "groupchat",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--db-path",
            ":memory:",
        ]);
        let mut settings = GroupchatSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9000);
        assert!(settings.server.is_in_memory_db());
    }

    #[test]
    fn absent_flags_keep_settings() {
        let cli = Cli::parse_from(["groupchat"]);
        let mut settings = GroupchatSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 4000);
    }

    #[test]
    fn server_config_follows_chat_settings() {
        let mut settings = GroupchatSettings::default();
        settings.chat.mailbox_capacity = 8;
        settings.chat.eviction_threshold = 2;
        let cfg = server_config(&settings);
        assert_eq!(cfg.mailbox_capacity, 8);
        assert_eq!(cfg.eviction_threshold, 2);
        assert_eq!(cfg.max_frame_bytes, 10 * 1024);
    }
}
