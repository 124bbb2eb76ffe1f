use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::buffer::{DEFAULT_MAX_LINE_LEN, DEFAULT_MAX_RESPONSE_CAPACITY, DEFAULT_RESPONSE_CAPACITY};
use crate::transport::TunnelSettings;
use crate::transport::tunnel::{DEFAULT_MAX_RAW_CAPACITY, DEFAULT_RAW_CAPACITY, DEFAULT_READ_CHUNK};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub llm: LlmConfig,
    pub stream: StreamConfig,
    pub proxy: ProxyConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_host: String,
    pub api_port: u16,
    pub api_path: String,
    pub api_version: String,
    pub default_model: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.anthropic.com/v1/messages".to_string(),
            api_host: "api.anthropic.com".to_string(),
            api_port: 443,
            api_path: "/v1/messages".to_string(),
            api_version: "2023-06-01".to_string(),
            default_model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            timeout_ms: 120000,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub max_line_len: usize,
    pub initial_response_capacity: usize,
    pub max_response_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_line_len: DEFAULT_MAX_LINE_LEN,
            initial_response_capacity: DEFAULT_RESPONSE_CAPACITY,
            max_response_capacity: DEFAULT_MAX_RESPONSE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub read_chunk: usize,
    pub initial_raw_capacity: usize,
    pub max_raw_capacity: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            connect_timeout_ms: 30000,
            read_timeout_ms: 120000,
            read_chunk: DEFAULT_READ_CHUNK,
            initial_raw_capacity: DEFAULT_RAW_CAPACITY,
            max_raw_capacity: DEFAULT_MAX_RAW_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("clawchat")
                .join("credentials.db"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            llm: LlmConfig::default(),
            stream: StreamConfig::default(),
            proxy: ProxyConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Tunnel settings derived from the API and proxy sections
    pub fn tunnel_settings(&self) -> TunnelSettings {
        TunnelSettings {
            host: self.llm.api_host.clone(),
            port: self.llm.api_port,
            path: self.llm.api_path.clone(),
            connect_timeout: Duration::from_millis(self.proxy.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.proxy.read_timeout_ms),
            read_chunk: self.proxy.read_chunk,
            initial_raw_capacity: self.proxy.initial_raw_capacity,
            max_raw_capacity: self.proxy.max_raw_capacity,
        }
    }
}
