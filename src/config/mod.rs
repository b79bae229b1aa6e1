/// Configuration management for the flowwork engine
///
/// Handles server configuration, the workflow store location and engine
/// tunables (polling cadence, persistence policy).

use crate::runtime::engine::{EngineSettings, PersistencePolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Workflow engine configuration
    pub engine: EngineConfig,
    /// Maximum log level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Workflow store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL (default: "sqlite://data/flowwork.db")
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub poll_interval_ms: u64,
    pub max_poll_sequence: u32,
    pub persistence: PersistencePolicy,
    /// Service name prefixed to background operation names
    pub service: String,
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            max_poll_sequence: self.max_poll_sequence,
            persistence: self.persistence,
            service: self.service.clone(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("FLOWWORK_HOST", "0.0.0.0"),
                port: env_or("FLOWWORK_PORT", "3004").parse().unwrap_or(3004),
            },
            database: DatabaseConfig {
                url: env_or("FLOWWORK_DATABASE_URL", "sqlite://data/flowwork.db"),
            },
            engine: EngineConfig {
                poll_interval_ms: env_or("FLOWWORK_POLL_INTERVAL_MS", "3000")
                    .parse()
                    .unwrap_or(3000),
                max_poll_sequence: env_or("FLOWWORK_MAX_POLL_SEQUENCE", "1200")
                    .parse()
                    .unwrap_or(1200),
                persistence: env_or("FLOWWORK_PERSISTENCE", "best-effort")
                    .parse()
                    .unwrap_or_default(),
                service: env_or("FLOWWORK_SERVICE", "flowwork"),
            },
            log_level: env_or("FLOWWORK_LOG", "info"),
        }
    }
}
