//! Client configuration: an optional JSON file, overridden by CLI flags.

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:3000";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UiMode {
    #[default]
    Console,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    #[default]
    Webrtc,
    Loopback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceServerKind {
    #[default]
    Stun,
    Turn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub url: String,
    #[serde(default, rename = "type")]
    pub kind: IceServerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: IceServerKind::Stun,
            username: None,
            credential: None,
        }
    }

    /// The url with a `stun:`/`turn:` scheme, prepended from `kind` when absent.
    pub fn url_with_scheme(&self) -> String {
        let has_scheme = ["stun:", "stuns:", "turn:", "turns:"]
            .iter()
            .any(|scheme| self.url.starts_with(scheme));
        if has_scheme {
            return self.url.clone();
        }
        match self.kind {
            IceServerKind::Stun => format!("stun:{}", self.url),
            IceServerKind::Turn => format!("turn:{}", self.url),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub relay_url: String,
    /// Generated at startup when absent.
    pub local_id: Option<String>,
    pub ice_servers: Vec<IceServerConfig>,
    pub ui: UiMode,
    pub platform: PlatformKind,
    pub log_filter: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            local_id: None,
            ice_servers: vec![IceServerConfig::stun(DEFAULT_STUN_SERVER)],
            ui: UiMode::default(),
            platform: PlatformKind::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.relay_url.starts_with("ws://") || self.relay_url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "relay_url must be a ws:// or wss:// url, got {:?}",
                self.relay_url
            )));
        }
        if matches!(&self.local_id, Some(id) if id.trim().is_empty()) {
            return Err(ConfigError::Invalid("local_id must not be empty".into()));
        }
        for server in &self.ice_servers {
            if server.url.trim().is_empty() {
                return Err(ConfigError::Invalid("ice server url must not be empty".into()));
            }
            if server.kind == IceServerKind::Turn
                && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::Invalid(format!(
                    "turn server {} requires username and credential",
                    server.url
                )));
            }
        }
        Ok(())
    }

    /// The configured id, or a fresh random one.
    pub fn resolve_local_id(&self) -> String {
        self.local_id.clone().unwrap_or_else(random_id)
    }
}

/// 16 hex characters from 8 random bytes.
pub fn random_id() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

#[derive(Parser, Debug)]
#[command(name = "peercall")]
#[command(about = "Peer-to-peer audio calls over a signaling relay")]
pub struct Cli {
    /// JSON config file; flags below override its values.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long)]
    pub relay: Option<String>,

    /// Id to register with; random when omitted.
    #[arg(short, long)]
    pub id: Option<String>,

    /// Extra STUN server, may be repeated.
    #[arg(long = "stun")]
    pub stun: Vec<String>,

    #[arg(long, value_enum)]
    pub ui: Option<UiMode>,

    #[arg(long, value_enum)]
    pub platform: Option<PlatformKind>,

    /// Log filter, e.g. `debug` or `peercall=trace`.
    #[arg(long = "log")]
    pub log_filter: Option<String>,

    /// Run a scripted call between two in-process clients and exit.
    #[arg(long)]
    pub demo: bool,
}

impl Cli {
    /// Loads the config file (if any), applies flag overrides and validates.
    pub fn to_config(&self) -> Result<ClientConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)?,
            None => ClientConfig::default(),
        };
        if let Some(relay) = &self.relay {
            config.relay_url = relay.clone();
        }
        if let Some(id) = &self.id {
            config.local_id = Some(id.clone());
        }
        config
            .ice_servers
            .extend(self.stun.iter().cloned().map(IceServerConfig::stun));
        if let Some(ui) = self.ui {
            config.ui = ui;
        }
        if let Some(platform) = self.platform {
            config.platform = platform;
        }
        if let Some(filter) = &self.log_filter {
            config.log_filter = filter.clone();
        }
        config.validate()?;
        Ok(config)
    }
}
