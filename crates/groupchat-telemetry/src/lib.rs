//! # groupchat-telemetry
//!
//! Installs the process-wide `tracing` subscriber: an `EnvFilter` (the
//! `RUST_LOG` variable wins over the configured level) feeding either JSON
//! lines or human-readable output on stdout.

#![deny(unsafe_code)]

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Config from a textual level; unknown levels fall back to `info`.
    pub fn from_level_str(level: &str, json: bool) -> Self {
        Self {
            log_level: parse_level(level).unwrap_or(Level::INFO),
            json,
        }
    }

    /// Filter directive used when `RUST_LOG` is unset, e.g. `info`.
    pub fn filter_directive(&self) -> String {
        self.log_level.to_string().to_lowercase()
    }
}

/// Subscriber installation failed (usually: one is already installed).
#[derive(Debug, thiserror::Error)]
#[error("failed to install tracing subscriber: {0}")]
pub struct TelemetryError(String);

/// Parse `trace`/`debug`/`info`/`warn`/`error` (case-insensitive).
pub fn parse_level(level: &str) -> Option<Level> {
    Level::from_str(level.trim()).ok()
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let directive = config.filter_directive();
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| TelemetryError(e.to_string()))
}
