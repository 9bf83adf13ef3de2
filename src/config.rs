//! Viewer configuration
//!
//! Read from a TOML or JSON file chosen by extension. Every key is
//! optional.

use std::path::Path;

use serde::Deserialize;

use crate::constants::texture_constants::TEXTURE_TIMEOUT_MS;
use crate::error::{SceneError, SceneResult};
use crate::scene::node::NodeId;

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(ConfigFormat::Json),
            Some("toml") => Some(ConfigFormat::Toml),
            _ => None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_texture_timeout() -> u64 {
    TEXTURE_TIMEOUT_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewerConfig {
    /// Start playing a recording as soon as it is loaded
    #[serde(default = "default_true")]
    pub autoplay: bool,

    #[serde(default = "default_true")]
    pub loop_animation: bool,

    /// Milliseconds before a texture stops counting as pending
    #[serde(default = "default_texture_timeout")]
    pub texture_timeout_ms: u64,

    /// Prepended to relative texture urls
    #[serde(default)]
    pub texture_path_prefix: String,

    /// Node to follow, overriding the Viewpoint's followedId
    #[serde(default)]
    pub follow_node: Option<NodeId>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            autoplay: true,
            loop_animation: true,
            texture_timeout_ms: TEXTURE_TIMEOUT_MS,
            texture_path_prefix: String::new(),
            follow_node: None,
            log_level: default_log_level(),
        }
    }
}

impl ViewerConfig {
    pub fn load(path: impl AsRef<Path>) -> SceneResult<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| config_error(format!("unknown config format for {}", path.display())))?;
        let raw = std::fs::read_to_string(path)
            .map_err(|e| config_error(format!("failed to read {}: {}", path.display(), e)))?;
        let config = Self::parse(&raw, format)?;
        log::info!("Loaded viewer config from {}", path.display());
        Ok(config)
    }

    pub fn parse(raw: &str, format: ConfigFormat) -> SceneResult<Self> {
        match format {
            ConfigFormat::Json => serde_json::from_str(raw)
                .map_err(|e| config_error(format!("invalid JSON config: {}", e))),
            ConfigFormat::Toml => {
                toml::from_str(raw).map_err(|e| config_error(format!("invalid TOML config: {}", e)))
            }
        }
    }

    /// Level filter for `env_logger`, falling back to `Info`
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

fn config_error(message: String) -> SceneError {
    SceneError::Config { message }
}
