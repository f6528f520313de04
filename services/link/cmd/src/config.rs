//! Configuration handling for the net-link demo binary.
//!
//! Values come from three layers, later ones winning: a YAML file, then
//! `NET_LINK_*` environment variables, then command-line flags.

use anyhow::{bail, Result};
use link_session::{SessionConfig, DEFAULT_SEND_QUEUE_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

/// Message encoding used by the demo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// Raw bytes, fixed-size reads
    Byte,
    /// Newline-delimited JSON
    Json,
}

impl FromStr for CodecKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "byte" | "bytes" => Ok(CodecKind::Byte),
            "json" => Ok(CodecKind::Json),
            other => bail!("unknown codec {:?}, expected \"byte\" or \"json\"", other),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::Byte => write!(f, "byte"),
            CodecKind::Json => write!(f, "json"),
        }
    }
}

/// Demo configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Address the server listens on
    pub listen: String,
    /// Address the client dials
    pub remote: String,
    /// Local address the client binds to; empty lets the OS choose
    pub local: String,
    /// Message encoding
    pub codec: CodecKind,
    /// Outbound queue capacity per session
    pub send_queue_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:10086".to_string(),
            remote: "127.0.0.1:10086".to_string(),
            local: String::new(),
            codec: CodecKind::Byte,
            send_queue_size: DEFAULT_SEND_QUEUE_SIZE,
        }
    }
}

/// Root configuration structure (matches the YAML layout)
#[derive(Debug, Deserialize)]
struct RootConfig {
    link: Option<LinkSection>,
}

#[derive(Debug, Deserialize)]
struct LinkSection {
    listen: Option<String>,
    remote: Option<String>,
    local: Option<String>,
    codec: Option<CodecKind>,
    send_queue_size: Option<usize>,
}

impl LinkConfig {
    /// Load configuration from file and environment variables.
    ///
    /// A missing or unparsable file falls back to defaults with a warning.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::from_file(config_path);
        config.apply_environment_overrides(|key| std::env::var(key).ok())?;

        info!(
            "Final link configuration: listen={}, remote={}, local={:?}, codec={}, send_queue_size={}",
            config.listen, config.remote, config.local, config.codec, config.send_queue_size
        );

        Ok(config)
    }

    fn from_file<P: AsRef<Path>>(config_path: P) -> Self {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?} ({}), using defaults",
                        config_path.as_ref(),
                        e
                    );
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", config_path.as_ref());
            }
        }

        config
    }

    /// Session configuration derived from this config
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            send_queue_size: self.send_queue_size,
        }
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        let Some(section) = root_config.link else {
            return;
        };

        if let Some(listen) = section.listen {
            self.listen = listen;
        }
        if let Some(remote) = section.remote {
            self.remote = remote;
        }
        if let Some(local) = section.local {
            self.local = local;
        }
        if let Some(codec) = section.codec {
            self.codec = codec;
        }
        if let Some(size) = section.send_queue_size {
            self.send_queue_size = size;
        }
    }

    /// Apply `NET_LINK_*` overrides read through `lookup`
    fn apply_environment_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup("NET_LINK_LISTEN") {
            info!("Listen address overridden by environment: {}", listen);
            self.listen = listen;
        }

        if let Some(remote) = lookup("NET_LINK_REMOTE") {
            info!("Remote address overridden by environment: {}", remote);
            self.remote = remote;
        }

        if let Some(local) = lookup("NET_LINK_LOCAL") {
            info!("Local address overridden by environment: {}", local);
            self.local = local;
        }

        if let Some(codec) = lookup("NET_LINK_CODEC") {
            self.codec = codec.parse()?;
            info!("Codec overridden by environment: {}", self.codec);
        }

        if let Some(size) = lookup("NET_LINK_SEND_QUEUE_SIZE") {
            match size.parse::<usize>() {
                Ok(size) => {
                    self.send_queue_size = size;
                    info!("Send queue size overridden by environment: {}", size);
                }
                Err(e) => warn!("Ignoring NET_LINK_SEND_QUEUE_SIZE={:?}: {}", size, e),
            }
        }

        Ok(())
    }
}
