//! Centralized configuration for Spindrift.
//!
//! All tunable parameters live here so timeouts and limits are never
//! hard-coded at call sites.

use std::time::Duration;

/// Central configuration for all Spindrift components.
#[derive(Debug, Clone, Default)]
pub struct SpindriftConfig {
    pub server: ServerConfig,
    pub resolve: ResolveConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listener on
    pub bind_address: String,
    /// Port to listen on; when taken, the next ports are tried
    pub port: u16,
    /// How many successive ports to try when the requested one is in use
    pub max_port_retries: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 3000,
            max_port_retries: 10,
        }
    }
}

/// Acquisition coordinator timing configuration.
#[derive(Debug, Clone)]
pub struct ResolveConfig {
    /// Primary window for an engine resolution to complete
    pub resolve_timeout: Duration,
    /// Secondary window spent listening for a late ready broadcast after
    /// the primary window elapses
    pub recovery_window: Duration,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(20),
            recovery_window: Duration::from_secs(5),
        }
    }
}
