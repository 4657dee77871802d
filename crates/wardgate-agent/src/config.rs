//! Agent configuration management
//!
//! Stored as JSON in ~/.wardgate/agent.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Control plane address (`host:port`)
    pub api_server: String,

    /// Start connecting as soon as the agent starts
    pub auto_connect: bool,

    /// Consecutive unreachable attempts before the user is warned
    pub retry_warning_threshold: u32,

    /// Stable device identifier; generated on first start when empty
    pub serial: String,

    pub platform: String,

    pub tenant: String,

    /// WireGuard keypair (base64), as produced by `wg genkey | tee priv | wg pubkey`
    pub private_key: String,
    pub public_key: String,

    /// Local control socket
    pub socket_path: PathBuf,

    /// Where the enrollment record is kept between runs
    pub enrollment_path: PathBuf,

    /// Identity token file read on every authentication
    pub token_path: PathBuf,

    /// WireGuard config written by the file configurer
    pub interface_path: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let dir = state_dir();
        Self {
            api_server: "127.0.0.1:8099".to_string(),
            auto_connect: false,
            retry_warning_threshold: 10,
            serial: String::new(),
            platform: std::env::consts::OS.to_string(),
            tenant: "default".to_string(),
            private_key: String::new(),
            public_key: String::new(),
            socket_path: dir.join("agent.sock"),
            enrollment_path: dir.join("enrollment.json"),
            token_path: dir.join("token"),
            interface_path: dir.join("wg0.conf"),
        }
    }
}

/// `~/.wardgate`, or `./.wardgate` when no home directory is known
pub fn state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".wardgate")
}

/// Configuration manager
pub struct ConfigManager;

impl ConfigManager {
    pub fn default_path() -> PathBuf {
        state_dir().join("agent.json")
    }

    /// Load the configuration at the default path
    pub fn load() -> Result<AgentConfig> {
        Self::load_from(&Self::default_path())
    }

    /// Load the configuration from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<AgentConfig> {
        if !path.exists() {
            return Ok(AgentConfig::default());
        }

        let json =
            fs::read_to_string(path).context(format!("Failed to read config file: {:?}", path))?;

        let config: AgentConfig = serde_json::from_str(&json)
            .context(format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    pub fn save(config: &AgentConfig) -> Result<()> {
        Self::save_to(&Self::default_path(), config)
    }

    pub fn save_to(path: &Path, config: &AgentConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create config directory: {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
        fs::write(path, json).context(format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Load from `path`, assigning and persisting a serial on first use
    pub fn load_or_init(path: &Path) -> Result<AgentConfig> {
        let mut config = Self::load_from(path)?;
        if config.serial.is_empty() {
            config.serial = uuid::Uuid::new_v4().to_string();
            Self::save_to(path, &config)?;
            tracing::info!(serial = %config.serial, path = ?path, "Assigned device serial");
        }
        Ok(config)
    }
}
