//! File-based configuration from `<config dir>/dimshift/config.toml`.

use crate::dispatch::{JoinPolicy, MAX_COUNT};
use crate::image::providers::GeminiModel;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV_VAR: &str = "DIMSHIFT_CONFIG";

/// Top-level config structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gemini model variant.
    pub model: GeminiModel,
    /// How a batch reacts to a failing request.
    pub join_policy: JoinPolicy,
    /// Images per batch when not given on the command line.
    pub image_count: u32,
    /// Where generated images are written.
    pub output_dir: PathBuf,
    /// Overrides the Gemini API base URL.
    pub base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: GeminiModel::default(),
            join_policy: JoinPolicy::default(),
            image_count: 1,
            output_dir: PathBuf::from("."),
            base_url: None,
        }
    }
}

impl Config {
    /// Loads config from `DIMSHIFT_CONFIG` or the default location.
    ///
    /// A missing or malformed file yields the defaults.
    pub fn load() -> Self {
        let path = std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(Self::config_path);
        Self::load_from(&path)
    }

    /// Loads config from an explicit path.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded config from file");
                    config.clamped()
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config file");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
        }
    }

    /// Get the config file path.
    pub fn config_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    fn clamped(mut self) -> Self {
        if !(1..=MAX_COUNT).contains(&self.image_count) {
            warn!(
                image_count = self.image_count,
                "image_count out of range, clamping to 1..={MAX_COUNT}"
            );
            self.image_count = self.image_count.clamp(1, MAX_COUNT);
        }
        self
    }
}

/// Directory holding config and credentials.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dimshift")
}
