use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server_url: String,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-attempt limit in seconds; 0 disables it.
    pub attempt_timeout_secs: u64,
    #[serde(skip)]
    dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            server_url: "http://localhost:8080".to_string(),
            max_retries: retry.max_retries,
            base_delay_ms: retry.base_delay.as_millis() as u64,
            max_delay_ms: retry.max_delay.as_millis() as u64,
            attempt_timeout_secs: 30,
            dir: PathBuf::new(),
        }
    }
}

impl Config {
    /// Load from `~/.config/heylina`, creating a default config on first run.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_dir()?)
    }

    pub fn load_from(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let path = dir.join("config.json");

        if !path.exists() {
            let config = Self {
                dir,
                ..Self::default()
            };
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.dir = dir;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(self.dir.join("config.json"), content)?;
        Ok(())
    }

    pub fn set_server_url(&mut self, url: &str) -> Result<()> {
        self.server_url = url.trim_end_matches('/').to_string();
        self.save()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn session_path(&self) -> PathBuf {
        self.dir.join("session.json")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.dir.join("queue.json")
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            attempt_timeout: (self.attempt_timeout_secs > 0)
                .then(|| Duration::from_secs(self.attempt_timeout_secs)),
            ..RetryConfig::default()
        }
    }

    fn default_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home.join(".config").join("heylina"))
    }
}
