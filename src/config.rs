use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_API_URL: &str = "CONSULTFLOW_API_URL";
pub const ENV_API_TOKEN: &str = "CONSULTFLOW_API_TOKEN";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: u32,
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Overrides the default drafts directory
    pub drafts_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: 1,
            api_base_url: "http://localhost:5000/api".to_string(),
            api_token: None,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            drafts_dir: None,
        }
    }
}

impl Config {
    /// Get the default config directory
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".consultflow"))
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default path or return default
    pub fn load_or_default() -> Self {
        match Self::config_path().and_then(|p| Self::load(&p)) {
            Ok(config) => config,
            Err(e) => {
                debug!("Failed to load config, using default: {}", e);
                Self::default()
            }
        }
    }

    /// Load config from file, or default if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {:?}", path))?;
            serde_json::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")
    }

    /// Apply `CONSULTFLOW_API_URL` / `CONSULTFLOW_API_TOKEN`
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.trim().is_empty() {
                self.api_base_url = url;
            }
        }
        if let Ok(token) = std::env::var(ENV_API_TOKEN) {
            self.api_token = Some(token).filter(|t| !t.is_empty());
        }
        self
    }

    /// Directory holding local drafts
    pub fn drafts_dir(&self) -> Result<PathBuf> {
        match self.drafts_dir {
            Some(ref dir) => Ok(dir.clone()),
            None => Ok(Self::config_dir()?.join("drafts")),
        }
    }
}
