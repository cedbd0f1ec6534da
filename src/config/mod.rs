//! Configuration management for airmac-signaling

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Relay listen address
    #[serde(default)]
    pub server: ServerConfig,

    /// Transport-level probe cycle
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// Routing conventions
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Controller session settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Listen port (HTTP and WebSocket share it)
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Seconds between probe sweeps; one missed probe evicts
    #[serde(default = "default_liveness_interval")]
    pub interval_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_liveness_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Ids starting with this are listed as hosts
    #[serde(default = "default_host_id_prefix")]
    pub host_id_prefix: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            host_id_prefix: default_host_id_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay WebSocket URL
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,

    /// Controller id; generated as `controller-<8 hex>` when unset
    #[serde(default)]
    pub controller_id: Option<String>,

    /// Host to select once the roster arrives
    #[serde(default)]
    pub host_id: Option<String>,

    /// Application ping period in seconds
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// STUN/TURN URLs handed to the peer connection
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: default_signaling_url(),
            controller_id: None,
            host_id: None,
            ping_interval_secs: default_ping_interval(),
            ice_servers: default_ice_servers(),
        }
    }
}

impl ClientConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Configured controller id, or a fresh one
    pub fn resolve_controller_id(&self) -> String {
        self.controller_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| generate_endpoint_id("controller"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            liveness: LivenessConfig::default(),
            signaling: SignalingConfig::default(),
            client: ClientConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.server.host.is_empty() {
            return Err("Server host must not be empty".into());
        }

        if self.liveness.interval_secs == 0 {
            return Err("Liveness interval must be non-zero".into());
        }

        if self.signaling.host_id_prefix.is_empty() {
            return Err("Host id prefix must not be empty".into());
        }

        if self.client.ping_interval_secs == 0 {
            return Err("Client ping interval must be non-zero".into());
        }

        let url = self.client.signaling_url.as_str();
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err("Client signaling_url must be a ws:// or wss:// URL".into());
        }

        for server in &self.client.ice_servers {
            if !(server.starts_with("stun:") || server.starts_with("turn:") || server.starts_with("turns:")) {
                return Err(format!("Unsupported ICE server URL: {}", server).into());
            }
        }

        if self.logging.level.parse::<log::LevelFilter>().is_err() {
            return Err(format!("Unknown log level: {}", self.logging.level).into());
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness.interval_secs)
    }
}

/// `<prefix>-<8 hex>` endpoint id
pub fn generate_endpoint_id(prefix: &str) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &uuid[..8])
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_liveness_interval() -> u64 {
    30
}

fn default_host_id_prefix() -> String {
    "host-".to_string()
}

fn default_signaling_url() -> String {
    "ws://localhost:8080".to_string()
}

fn default_ping_interval() -> u64 {
    25
}

fn default_ice_servers() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun1.l.google.com:19302".to_string(),
    ]
}
