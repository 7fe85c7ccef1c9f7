//! Configuration Store
//!
//! Handles loading/saving the TOML config shared by the host process and
//! every tool-invocation process. Both sides read the same file, so a port
//! override reaches them together.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HoldOnError, Result};

/// Well-known bridge port.
pub const DEFAULT_PORT: u16 = 19876;
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// 30 minutes, on both sides of the bridge.
pub const DEFAULT_TIMEOUT_SECS: u64 = 1800;
/// One week. Longer waits are a misconfiguration, not a review.
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub panel: PanelConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds before an unanswered request resolves as approved
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelConfig {
    #[serde(default)]
    pub concurrency: ConcurrencyPolicy,
}

/// What happens when a prompt arrives while another one is still waiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// The newer prompt takes the slot; the displaced caller is approved.
    #[default]
    Supersede,
    /// The newer prompt is approved at once; the waiting one keeps the slot.
    Reject,
}

impl std::fmt::Display for ConcurrencyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcurrencyPolicy::Supersede => write!(f, "supersede"),
            ConcurrencyPolicy::Reject => write!(f, "reject"),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `path`, or the default location, falling back to defaults
    /// when no file exists.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn default_path() -> Option<PathBuf> {
        get_config_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        let ip: IpAddr = self.bridge.host.parse().map_err(|_| HoldOnError::InvalidConfig {
            message: format!("bridge.host `{}` is not an IP address", self.bridge.host),
        })?;
        if !ip.is_loopback() {
            return Err(HoldOnError::InvalidConfig {
                message: format!("bridge.host `{}` is not a loopback address", ip),
            });
        }
        if self.bridge.port == 0 {
            return Err(HoldOnError::InvalidConfig {
                message: "bridge.port must be non-zero".to_string(),
            });
        }
        if self.bridge.timeout_secs == 0 || self.bridge.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(HoldOnError::InvalidConfig {
                message: format!(
                    "bridge.timeout_secs must be between 1 and {}",
                    MAX_TIMEOUT_SECS
                ),
            });
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.bridge.host.parse().map_err(|_| HoldOnError::InvalidConfig {
            message: format!("bridge.host `{}` is not an IP address", self.bridge.host),
        })?;
        Ok(SocketAddr::new(ip, self.bridge.port))
    }

    pub fn bridge_url(&self) -> String {
        match self.socket_addr() {
            Ok(addr) => format!("ws://{}", addr),
            Err(_) => format!("ws://{}:{}", self.bridge.host, self.bridge.port),
        }
    }

    pub fn feedback_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge.timeout_secs)
    }
}

/// Get the configuration directory path
pub fn get_config_dir() -> Option<PathBuf> {
    if let Some(dir) = dirs::config_dir() {
        return Some(dir.join("holdon"));
    }

    home::home_dir().map(|home| home.join(".config").join("holdon"))
}

/// Directory for host logs
pub fn get_data_dir() -> Option<PathBuf> {
    if let Some(dir) = dirs::data_dir() {
        return Some(dir.join("holdon"));
    }

    home::home_dir().map(|home| home.join(".local").join("share").join("holdon"))
}
