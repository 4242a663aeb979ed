//! Application settings
//!
//! Only deployment details live here (which camera, where the model is).
//! Detection parameters come from the device profile and are not configurable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ml::posenet::MODEL_FILE_NAME;

const CONFIG_DIR_NAME: &str = "facemoji";
const CONFIG_FILE_NAME: &str = "config.json";

/// Errors raised while reading settings
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Models directory not found. Create a 'models' directory containing {0}")]
    ModelsNotFound(&'static str),
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Camera index used for the "user" facing mode
    pub camera_index: u32,
    /// Explicit model file; searched for when unset
    pub model_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            model_path: None,
        }
    }
}

impl AppConfig {
    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load settings from the default location, falling back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load settings from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Model file to load: the configured one, or the first models directory found
    pub fn resolve_model_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.model_path {
            return Ok(path.clone());
        }
        find_model_dir()
            .map(|dir| dir.join(MODEL_FILE_NAME))
            .ok_or(ConfigError::ModelsNotFound(MODEL_FILE_NAME))
    }
}

/// Find the models directory
fn find_model_dir() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    // Next to the executable, then up to target/<profile>/.. for cargo run
    if let Ok(exe_path) = std::env::current_exe() {
        candidates.extend(exe_path.ancestors().skip(1).take(3).map(|dir| dir.join("models")));
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("models"));
    }

    candidates.into_iter().find(|dir| dir.is_dir())
}
