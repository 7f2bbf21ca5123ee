use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{KnowledgeGraphError, Result};

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default database file, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = "kg.db";

/// Runtime configuration for the gateway process.
///
/// Loaded from an optional TOML file; any key left out takes its default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the HTTP listener binds to.
    pub host: String,
    /// Port the HTTP listener binds to.
    pub port: u16,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Whether to serve MCP over stdin/stdout.
    pub enable_stdio: bool,
    /// Whether to serve the HTTP routes.
    pub enable_http: bool,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            enable_stdio: true,
            enable_http: true,
            log_level: "info".to_string(),
        }
    }
}

/// Values given on the command line. `None` leaves the file value alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub enable_stdio: Option<bool>,
    pub enable_http: Option<bool>,
    pub log_level: Option<String>,
}

impl GatewayConfig {
    /// Replaces every field that has an override.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(db_path) = overrides.db_path {
            self.db_path = db_path;
        }
        if let Some(enable_stdio) = overrides.enable_stdio {
            self.enable_stdio = enable_stdio;
        }
        if let Some(enable_http) = overrides.enable_http {
            self.enable_http = enable_http;
        }
        if let Some(log_level) = overrides.log_level {
            self.log_level = log_level;
        }
    }

    /// Resolves `host:port` into a bindable address. `host` may be an IP
    /// literal or a name such as `localhost`; the first resolved address wins.
    pub async fn resolve_addr(&self) -> Result<SocketAddr> {
        let raw = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        };
        let mut addrs = tokio::net::lookup_host(raw.as_str())
            .await
            .map_err(|e| KnowledgeGraphError::Config {
                message: format!("invalid listen address '{raw}': {e}"),
            })?;
        addrs.next().ok_or_else(|| KnowledgeGraphError::Config {
            message: format!("listen address '{raw}' resolved to nothing"),
        })
    }
}

/// Loads the configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig> {
    let contents = fs::read_to_string(path).map_err(|e| KnowledgeGraphError::Config {
        message: format!("failed to read config file '{}': {}", path.display(), e),
    })?;

    toml::from_str(&contents).map_err(|e| KnowledgeGraphError::Config {
        message: format!("failed to parse config file '{}': {}", path.display(), e),
    })
}
