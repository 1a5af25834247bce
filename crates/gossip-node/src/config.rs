//! Node configuration.

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Peer-to-peer gossip node.
#[derive(Parser, Debug, Default)]
#[command(name = "gossip-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "gossip-node.toml")]
    pub config: PathBuf,

    /// Node name (the gossip origin)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Client (UI) listen address
    #[arg(long)]
    pub client_bind: Option<String>,

    /// Peer listen address
    #[arg(long)]
    pub peer_bind: Option<String>,

    /// Comma-separated list of seed peers
    #[arg(long)]
    pub peers: Option<String>,

    /// Flood simple messages instead of gossiping rumors
    #[arg(long)]
    pub simple: bool,

    /// Directory of files shared with the mesh
    #[arg(long)]
    pub shared_dir: Option<PathBuf>,

    /// Directory downloads are assembled into
    #[arg(long)]
    pub downloads_dir: Option<PathBuf>,

    /// Seconds between route rumors (0 = disabled)
    #[arg(long)]
    pub route_rumor_secs: Option<u64>,

    /// Disable the mining thread
    #[arg(long)]
    pub no_mining: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name; the origin carried on every message this node creates.
    pub name: String,
    /// Client (UI) listen address.
    pub client_bind: String,
    /// Peer listen address.
    pub peer_bind: String,
    /// Seed peers.
    pub peers: Vec<String>,
    /// Flood mode: distribute simple messages instead of rumors.
    #[serde(default)]
    pub simple: bool,
    /// Directory of shared files.
    pub shared_dir: PathBuf,
    /// Directory downloads land in.
    pub downloads_dir: PathBuf,
    /// Seconds between periodic route rumors; 0 disables the timer.
    #[serde(default)]
    pub route_rumor_secs: u64,
    /// Whether the mining thread runs.
    #[serde(default = "default_true")]
    pub mining: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "gossiper".to_string(),
            client_bind: "127.0.0.1:8080".to_string(),
            peer_bind: "127.0.0.1:5000".to_string(),
            peers: Vec::new(),
            simple: false,
            shared_dir: PathBuf::from("_SharedFiles"),
            downloads_dir: PathBuf::from("_Downloads"),
            route_rumor_secs: 0,
            mining: true,
        }
    }
}

impl NodeConfig {
    /// Load configuration from file and CLI args; CLI wins.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default()
        };

        if let Some(ref name) = args.name {
            config.name = name.clone();
        }
        if let Some(ref client_bind) = args.client_bind {
            config.client_bind = client_bind.clone();
        }
        if let Some(ref peer_bind) = args.peer_bind {
            config.peer_bind = peer_bind.clone();
        }
        if let Some(ref peers) = args.peers {
            config.peers = peers
                .split(',')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if args.simple {
            config.simple = true;
        }
        if let Some(ref dir) = args.shared_dir {
            config.shared_dir = dir.clone();
        }
        if let Some(ref dir) = args.downloads_dir {
            config.downloads_dir = dir.clone();
        }
        if let Some(secs) = args.route_rumor_secs {
            config.route_rumor_secs = secs;
        }
        if args.no_mining {
            config.mining = false;
        }

        if config.name.is_empty() {
            anyhow::bail!("Node name must not be empty");
        }

        Ok(config)
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let args = Args {
            name: Some("alice".to_string()),
            peers: Some("127.0.0.1:5001,127.0.0.1:5002".to_string()),
            no_mining: true,
            ..Default::default()
        };
        let config = NodeConfig::load(Path::new("/nonexistent.toml"), &args).unwrap();
        assert_eq!(config.name, "alice");
        assert_eq!(config.peers.len(), 2);
        assert!(!config.mining);
        assert!(!config.simple);
    }

    #[test]
    fn test_empty_name_rejected() {
        let args = Args {
            name: Some(String::new()),
            ..Default::default()
        };
        assert!(NodeConfig::load(Path::new("/nonexistent.toml"), &args).is_err());
    }
}
