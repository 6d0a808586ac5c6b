//! Configuration types for the setup and launch harness.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level harness configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Application launch settings.
    pub launch: LaunchConfig,
    /// Remote sources for the checkout and asset archives.
    pub sources: SourcesConfig,
}

/// Application launch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// TCP port handed to the application via `--port`.
    pub port: u16,
    /// Hide all GPUs from the application (forces CPU inference).
    pub disable_gpu: bool,
    /// Entry script within the checkout (None = auto-detect).
    pub entry_script: Option<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            port: 7860,
            disable_gpu: false,
            entry_script: None,
        }
    }
}

/// Remote source locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Git URL of the application checkout.
    pub repo_url: String,
    /// URL of the pretrained model archive.
    pub model_url: String,
    /// URL of the reference voice sample archive.
    pub voices_url: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            repo_url: "https://huggingface.co/spaces/IAsistemofinteres/xtts-webui".to_owned(),
            model_url: "https://huggingface.co/IAsistemofinteres/xtts_model/resolve/main/model.zip"
                .to_owned(),
            voices_url: "https://huggingface.co/datasets/IAsistemofinteres/vz/resolve/main/vc.zip"
                .to_owned(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::HarnessError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::HarnessError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load the config for this invocation.
    ///
    /// An explicit path must exist and parse. Without one, the default
    /// config file is used when present, and built-in defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or parsed.
    pub fn load(explicit: Option<&Path>) -> crate::error::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let default_path = crate::paths::config_file();
        if default_path.is_file() {
            Self::from_file(&default_path)
        } else {
            Ok(Self::default())
        }
    }
}
