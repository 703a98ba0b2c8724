//! TOML configuration with defaults for every field.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bus::DEFAULT_CHANNEL_CAPACITY;
use crate::error::{ChatError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "whispernet.toml";

/// Settings for the generative content provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub base_url: String,
    pub image_model: String,
    pub speech_model: String,
    pub voice: String,
    /// Sample rate of the PCM returned by the speech model.
    pub sample_rate: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            image_model: "imagen-4.0-generate-001".to_string(),
            speech_model: "gemini-2.5-flash-preview-tts".to_string(),
            voice: "Kore".to_string(),
            sample_rate: 24_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Broadcast buffer per room.
    pub channel_capacity: usize,
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`.
    pub log_filter: String,
    /// Room the REPL enters on startup.
    pub default_room: Option<String>,
    /// Number of simulated contexts in the REPL.
    pub tabs: usize,
    pub generation: GenerationConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            log_filter: "info".to_string(),
            default_room: None,
            tabs: 2,
            generation: GenerationConfig::default(),
        }
    }
}

impl ChatConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| ChatError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(ChatError::Config("channel_capacity must be > 0".to_string()));
        }
        if self.tabs == 0 {
            return Err(ChatError::Config("tabs must be >= 1".to_string()));
        }
        if self.generation.sample_rate == 0 {
            return Err(ChatError::Config("generation.sample_rate must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ChatError::Config(e.to_string()))
    }
}

/// Load `path`, falling back to defaults when the file does not exist.
pub fn load_config(path: &Path) -> Result<ChatConfig> {
    match fs::read_to_string(path) {
        Ok(content) => ChatConfig::from_toml_str(&content)
            .map_err(|e| ChatError::Config(format!("{}: {e}", path.display()))),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::info!("config file {} not found; using defaults", path.display());
            Ok(ChatConfig::default())
        }
        Err(err) => Err(ChatError::Config(format!(
            "cannot read {}: {err}",
            path.display()
        ))),
    }
}
