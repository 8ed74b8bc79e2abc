use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const DEFAULT_BIND: &str = "0.0.0.0:8000";
const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "gemma3:1b";
pub const DEFAULT_OLLAMA_TIMEOUT: u64 = 30;

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    ollama: OllamaConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ServerConfig {
    bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StorageConfig {
    data_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OllamaConfig {
    base_url: Option<String>,
    model: Option<String>,
    timeout: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub data_dir: PathBuf,
    pub ollama_url: String,
    pub ollama_model: String,
    pub ollama_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_parts(ConfigFile::default())
    }
}

impl Config {
    fn from_parts(file: ConfigFile) -> Self {
        Self {
            bind: file.server.bind.unwrap_or_else(|| DEFAULT_BIND.to_string()),
            data_dir: file
                .storage
                .data_dir
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())
                .into(),
            ollama_url: file
                .ollama
                .base_url
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            ollama_model: file
                .ollama
                .model
                .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
            ollama_timeout: Duration::from_secs(
                file.ollama.timeout.unwrap_or(DEFAULT_OLLAMA_TIMEOUT),
            ),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config_file: ConfigFile =
            toml::from_str(content).context("Failed to parse config file")?;
        Ok(Self::from_parts(config_file))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
    }

    /// Environment variables win over the file.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            self.ollama_url = url;
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            self.ollama_model = model;
        }
        if let Ok(timeout) = std::env::var("OLLAMA_TIMEOUT") {
            let secs: u64 = timeout
                .parse()
                .with_context(|| format!("Invalid OLLAMA_TIMEOUT: {}", timeout))?;
            self.ollama_timeout = Duration::from_secs(secs);
        }
        Ok(self)
    }

    pub fn load() -> Result<Self> {
        let path = std::env::var("BTP_CHAT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::from_file(Path::new(&path))?.apply_env()
    }
}
