use clap::Parser;
use std::path::PathBuf;

use crate::config;

#[derive(Parser, Debug)]
#[command(name = "airmac-signaling")]
#[command(author = "AirMac Team")]
#[command(version)]
#[command(about = "AirMac signaling relay", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/airmac-signaling.toml")]
    pub config: PathBuf,

    /// Bind address
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port (env PORT also accepted)
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Seconds between liveness probes
    #[arg(long)]
    pub liveness_interval: Option<u64>,

    /// Id prefix that marks an endpoint as a host
    #[arg(long)]
    pub host_prefix: Option<String>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    /// Load the config file and apply command line overrides
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        let mut config = config::Config::load(&self.config)?;
        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(secs) = self.liveness_interval {
            config.liveness.interval_secs = secs;
        }
        if let Some(ref prefix) = self.host_prefix {
            config.signaling.host_id_prefix = prefix.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Parser, Debug)]
#[command(name = "airmac-controller")]
#[command(author = "AirMac Team")]
#[command(version)]
#[command(about = "Headless AirMac controller", long_about = None)]
pub struct ControllerArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/airmac-signaling.toml")]
    pub config: PathBuf,

    /// Relay WebSocket URL
    #[arg(short, long)]
    pub url: Option<String>,

    /// Controller id
    #[arg(long)]
    pub id: Option<String>,

    /// Host to connect to; without it the roster is only listed
    #[arg(long)]
    pub host: Option<String>,

    /// Extra STUN/TURN URL (repeatable, replaces the configured list)
    #[arg(long = "ice-server")]
    pub ice_servers: Vec<String>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl ControllerArgs {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        let mut config = config::Config::load(&self.config)?;
        if let Some(ref url) = self.url {
            config.client.signaling_url = url.clone();
        }
        if self.id.is_some() {
            config.client.controller_id = self.id.clone();
        }
        if self.host.is_some() {
            config.client.host_id = self.host.clone();
        }
        if !self.ice_servers.is_empty() {
            config.client.ice_servers = self.ice_servers.clone();
        }
        config.validate()?;
        Ok(config)
    }
}
