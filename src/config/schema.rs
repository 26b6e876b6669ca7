use crate::error::{CuratorError, Result};
use crate::models::CatalogEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Replaces the built-in catalog when non-empty
    #[serde(default)]
    pub models: Vec<CatalogEntry>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct AiConfig {
    /// Feature flag gating every lifecycle and generation operation
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct EngineConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct GenerationConfig {
    /// Characters of raw model output kept on a failed generation
    #[serde(default = "default_diagnostic_excerpt_chars")]
    pub diagnostic_excerpt_chars: usize,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_backend() -> String {
    "ollama".to_string()
}
fn default_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_keep_alive() -> String {
    "30m".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_diagnostic_excerpt_chars() -> usize {
    500
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            keep_alive: default_keep_alive(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            diagnostic_excerpt_chars: default_diagnostic_excerpt_chars(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ai: AiConfig::default(),
            engine: EngineConfig::default(),
            generation: GenerationConfig::default(),
            models: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from the user config directory, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load and validate config from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            CuratorError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject values the engine or pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.engine.temperature) {
            return Err(CuratorError::Config(format!(
                "temperature must be between 0.0 and 2.0, got: {}",
                self.engine.temperature
            )));
        }

        if self.engine.max_tokens == 0 {
            return Err(CuratorError::Config(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        if self.engine.base_url.trim().is_empty() {
            return Err(CuratorError::Config("base_url must not be empty".to_string()));
        }

        if self.generation.diagnostic_excerpt_chars == 0 {
            return Err(CuratorError::Config(
                "diagnostic_excerpt_chars must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &self.models {
            let id = entry.model_id();
            if !seen.insert(id.clone()) {
                return Err(CuratorError::Config(format!(
                    "Duplicate catalog model id: {id}"
                )));
            }
        }

        Ok(())
    }
}

/// Get config file path from `XDG_CONFIG_HOME` or `~/.config`
pub fn config_path() -> Result<PathBuf> {
    let config_dir = if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config)
    } else {
        dirs::home_dir()
            .ok_or_else(|| CuratorError::Config("Cannot determine home directory".to_string()))?
            .join(".config")
    };

    Ok(config_dir.join("curator").join("config.toml"))
}
