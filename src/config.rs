//! Configuration management.
//!
//! Follows the sub-config-composition pattern of the teacher's
//! `config.rs`: a top-level `Config` made of small `#[serde(default)]`
//! sub-structs, each field defaulted via a named `default_xxx()` function
//! (the convention `CronHeartbeatConfig` in `gateway/heartbeat.rs`
//! demonstrates most clearly).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Recognized configuration; all other names are rejected by `serde(deny_unknown_fields)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server_url: String,
    #[serde(default = "default_true")]
    pub use_websocket: bool,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default = "default_true")]
    pub enable_voice: bool,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub auto_connect: bool,
    #[serde(default)]
    pub keyword_models: KeywordModelsConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default)]
    pub mqtt_broker: Option<String>,
    #[serde(default)]
    pub mqtt_port: Option<u16>,
    #[serde(default)]
    pub mqtt_client_id: Option<String>,
    #[serde(default)]
    pub mqtt_topic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_input_sample_rate")]
    pub audio_input_sample_rate: u32,
    #[serde(default = "default_output_sample_rate")]
    pub audio_output_sample_rate: u32,
    #[serde(default = "default_channels")]
    pub audio_channels: u16,
    #[serde(default = "default_format")]
    pub audio_format: String,
}

fn default_input_sample_rate() -> u32 {
    16_000
}
fn default_output_sample_rate() -> u32 {
    24_000
}
fn default_channels() -> u16 {
    1
}
fn default_format() -> String {
    "opus".to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            audio_input_sample_rate: default_input_sample_rate(),
            audio_output_sample_rate: default_output_sample_rate(),
            audio_channels: default_channels(),
            audio_format: default_format(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordModelsConfig {
    #[serde(default)]
    pub models_path: Option<String>,
    #[serde(default)]
    pub current_model: String,
    #[serde(default)]
    pub available_models: Vec<String>,
}

impl Config {
    /// Load from a TOML file, rejecting unrecognized top-level keys.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {:?}", path))?;
        let config: Config =
            toml::from_str(&text).with_context(|| format!("failed to parse config: {:?}", path))?;
        Ok(config)
    }

    /// Default config path, mirroring the teacher's `data_dir()` layout
    /// convention for user-level configuration.
    pub fn default_path() -> Result<PathBuf> {
        let dir = directories_dir()?;
        Ok(dir.join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_url.is_empty() {
            anyhow::bail!("server_url is required");
        }
        if !self.use_websocket {
            let mqtt = &self.mqtt;
            if mqtt.mqtt_broker.is_none() || mqtt.mqtt_topic.is_none() {
                anyhow::bail!("mqtt_broker and mqtt_topic are required when use_websocket=false");
            }
        }
        Ok(())
    }
}

fn directories_dir() -> Result<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .context("could not determine a config directory")?;
    Ok(base.join("xiaozhi-client"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_defaults_match_spec() {
        let config = AudioConfig::default();
        assert_eq!(config.audio_input_sample_rate, 16_000);
        assert_eq!(config.audio_output_sample_rate, 24_000);
        assert_eq!(config.audio_channels, 1);
        assert_eq!(config.audio_format, "opus");
    }

    #[test]
    fn rejects_mqtt_config_without_broker() {
        let config = Config {
            server_url: "wss://example/ws".to_string(),
            use_websocket: false,
            mqtt: MqttConfig::default(),
            enable_voice: true,
            audio: AudioConfig::default(),
            auto_connect: false,
            keyword_models: KeywordModelsConfig::default(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_text = r#"server_url = "wss://example/xiaozhi/v1/""#;
        let config: Config = toml::from_str(toml_text).unwrap();
        assert!(config.use_websocket);
        assert!(config.enable_voice);
        assert_eq!(config.audio.audio_input_sample_rate, 16_000);
    }

    #[test]
    fn load_reads_a_real_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            server_url = "wss://example/xiaozhi/v1/"
            enable_voice = false
            "#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server_url, "wss://example/xiaozhi/v1/");
        assert!(!config.enable_voice);
    }

    #[test]
    fn load_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"server_url = "wss://example/ws"
            not_a_real_option = true"#,
        )
        .unwrap();

        assert!(Config::load(&path).is_err());
    }
}
