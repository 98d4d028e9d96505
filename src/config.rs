//! Application configuration
//!
//! Stored as TOML below the home directory. A missing file is created with
//! defaults. A broken file is reported and the defaults are used, so the
//! viewer always starts.

use crate::mqtt::config::MqttConfig;
use crate::mqtt::topic_selector::AnimalTopic;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = ".config/animal-photos";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub ui: UIConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct UIConfig {
    /// Repaint interval, also how often the display channel is drained
    pub poll_frequency_ms: u64,
    /// How long a notice stays visible
    pub notice_duration_ms: u64,
    pub fullscreen: bool,
    /// Topic picked at start-up, one of `cachorro`, `boi`, `cavalo`, `capivara`
    pub initial_topic: String,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            poll_frequency_ms: 33,
            notice_duration_ms: 2_000,
            fullscreen: false,
            initial_topic: AnimalTopic::default().to_string(),
        }
    }
}

impl UIConfig {
    pub fn poll_frequency(&self) -> Duration {
        Duration::from_millis(self.poll_frequency_ms)
    }

    pub fn notice_duration(&self) -> Duration {
        Duration::from_millis(self.notice_duration_ms)
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| eyre!("Failed to parse config: {}", e))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| eyre!("Failed to serialize config: {}", e))
    }

    pub fn default_path() -> PathBuf {
        let mut path = get_home_dir();
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads the config file, writing a default one if none exists
    pub async fn load_or_default() -> Self {
        let path = Self::default_path();
        match Self::load_from(&path).await {
            Ok(config) => config,
            Err(e) => {
                warn!("Using default configuration: {}", e);
                Self::default()
            }
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            info!("No config at {}, writing defaults", path.display());
            let config = Self::default();
            config.save_to(path).await?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = Self::from_toml_str(&content)?;
        debug!("Loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        tokio::fs::write(path, self.to_toml_string()?)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;
        Ok(())
    }
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_public_broker() {
        let config = Config::default();
        assert_eq!(config.mqtt.broker(), "broker.hivemq.com:1883");
        assert_eq!(config.ui.notice_duration(), Duration::from_secs(2));
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config = Config::from_toml_str(
            r#"
            [mqtt]
            host = "localhost"
            port = 1884

            [ui]
            fullscreen = true
            "#,
        )
        .unwrap();

        assert_eq!(config.mqtt.broker(), "localhost:1884");
        assert_eq!(config.mqtt.connect_timeout(), Duration::from_secs(10));
        assert!(config.ui.fullscreen);
        assert_eq!(config.ui.poll_frequency_ms, 33);
        assert_eq!(config.ui.initial_topic, "cachorro");
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn serialized_defaults_parse_back() {
        let content = Config::default().to_toml_string().unwrap();
        assert!(content.contains("broker.hivemq.com"));
        assert_eq!(Config::from_toml_str(&content).unwrap(), Config::default());
    }

    #[test]
    fn invalid_file_is_an_error() {
        assert!(Config::from_toml_str("[mqtt]\nport = \"eighty\"").is_err());
    }

    #[test]
    fn client_ids_use_prefix() {
        let id = MqttConfig::default().generate_client_id();
        assert!(id.starts_with("animal-photos-"));
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let mut path = std::env::temp_dir();
        path.push(format!("animal-photos-test-{}", std::process::id()));
        path.push(CONFIG_FILE);
        let _ = tokio::fs::remove_file(&path).await;

        let config = Config::load_from(&path).await.unwrap();
        assert_eq!(config, Config::default());
        assert!(tokio::fs::try_exists(&path).await.unwrap());

        let reloaded = Config::load_from(&path).await.unwrap();
        assert_eq!(reloaded, config);

        if let Some(dir) = path.parent() {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
    }
}
