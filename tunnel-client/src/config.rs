//! Client configuration
//!
//! Values come from an optional JSON file (`--config <path>`); individual
//! command line flags override the file.

use std::error::Error;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use control_plane::ControllerConfig;
use serde::Deserialize;

// ============================================================================
// Constants
// ============================================================================

/// Default server port
pub const DEFAULT_SERVER_PORT: u16 = 4433;

/// Default tunnel device name
#[cfg(target_os = "macos")]
pub const DEFAULT_DEV_NAME: &str = "utun5";
#[cfg(not(target_os = "macos"))]
pub const DEFAULT_DEV_NAME: &str = "tun0";

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Control channel peer
    pub server: SocketAddr,
    /// Local bind address for the control socket
    pub bind: SocketAddr,
    /// Tunnel device routes are installed on
    pub dev_name: String,
    /// Persistent route file (`CIDR<TAB>COMMENT` lines)
    pub route_file: Option<PathBuf>,
    /// Opaque credential sent in the AUTH request
    pub token: String,
    /// Controller housekeeping tick
    pub housekeeping_interval_ms: u64,
    /// Drop unanswered requests after this long (disabled when absent)
    pub stale_request_ms: Option<u64>,
    /// Inbound queue capacity
    pub inbound_queue_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server: SocketAddr::from(([127, 0, 0, 1], DEFAULT_SERVER_PORT)),
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            dev_name: DEFAULT_DEV_NAME.to_string(),
            route_file: None,
            token: String::new(),
            housekeeping_interval_ms: 1000,
            stale_request_ms: None,
            inbound_queue_len: 0,
        }
    }
}

impl ClientConfig {
    /// Read a JSON config file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn Error>> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("cannot read config {}: {}", path.display(), e))?;
        let config = serde_json::from_str(&content)
            .map_err(|e| format!("invalid config {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Build the configuration from command line arguments
    ///
    /// --config <path>     JSON config file (optional)
    /// --server <addr:port> Control channel peer
    /// --bind <addr:port>  Local bind address
    /// --dev <name>        Tunnel device name
    /// --routes <path>     Route file
    /// --token <value>     AUTH credential
    pub fn from_args(args: &[String]) -> Result<Self, Box<dyn Error>> {
        let mut config = match parse_arg(args, "--config") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(server) = parse_arg(args, "--server") {
            config.server = server.parse().map_err(|_| "Invalid server address")?;
        }
        if let Some(bind) = parse_arg(args, "--bind") {
            config.bind = bind.parse().map_err(|_| "Invalid bind address")?;
        }
        if let Some(dev) = parse_arg(args, "--dev") {
            config.dev_name = dev;
        }
        if let Some(routes) = parse_arg(args, "--routes") {
            config.route_file = Some(PathBuf::from(routes));
        }
        if let Some(token) = parse_arg(args, "--token") {
            config.token = token;
        }

        Ok(config)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            inbound_queue_len: self.inbound_queue_len,
            housekeeping_interval: Duration::from_millis(self.housekeeping_interval_ms.max(1)),
            stale_after: self.stale_request_ms.map(Duration::from_millis),
            ..ControllerConfig::default()
        }
    }
}

pub fn parse_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
