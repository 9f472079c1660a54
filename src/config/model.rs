//! Configuration data model.
//!
//! All structs derive `Serialize`/`Deserialize` for TOML persistence.
//! Every field except the server host has a usable default.

use serde::{Deserialize, Serialize};

use super::nickname::generate_nickname;
use crate::irc::connection::{
    DEFAULT_OUTBOUND_CAPACITY, DEFAULT_ROUTE_CAPACITY, DEFAULT_UNHANDLED_CAPACITY,
};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The one server to connect to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_nickname")]
    pub nickname: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            nickname: default_nickname(),
        }
    }
}

/// Queue sizes for a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    #[serde(default = "default_unhandled_capacity")]
    pub unhandled_capacity: usize,
    #[serde(default = "default_route_capacity")]
    pub route_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: default_outbound_capacity(),
            unhandled_capacity: default_unhandled_capacity(),
            route_capacity: default_route_capacity(),
        }
    }
}

/// Diagnostics and transcript settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            timestamp_format: default_timestamp_format(),
        }
    }
}

fn default_nickname() -> String {
    generate_nickname()
}
fn default_port() -> u16 {
    6667
}
fn default_outbound_capacity() -> usize {
    DEFAULT_OUTBOUND_CAPACITY
}
fn default_unhandled_capacity() -> usize {
    DEFAULT_UNHANDLED_CAPACITY
}
fn default_route_capacity() -> usize {
    DEFAULT_ROUTE_CAPACITY
}
fn default_level() -> String {
    "info".to_string()
}
fn default_timestamp_format() -> String {
    "%H:%M:%S".to_string()
}
