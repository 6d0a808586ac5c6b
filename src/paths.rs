//! Centralized filesystem layout for the harness.
//!
//! Provides a single source of truth for every path the harness touches.
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! # Directory Layout
//!
//! ```text
//! <base>/
//!   xtts-webui/        application checkout
//!     model/           extracted model files
//!   voice_samples/     extracted reference audio
//!   temp/              archive downloads in flight
//!   venv/              python virtual environment
//!   logs/              launcher log files
//! ```
//!
//! # Environment Overrides
//!
//! - `XTTS_LOCAL_HOME` — overrides the base directory
//! - `XTTS_LOCAL_CONFIG_DIR` — overrides [`config_dir`]

use std::path::{Path, PathBuf};

/// Default base directory (`dirs::data_dir()/xtts-local/`).
///
/// Override with the `XTTS_LOCAL_HOME` environment variable.
#[must_use]
pub fn default_base_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("XTTS_LOCAL_HOME") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("xtts-local"))
        .unwrap_or_else(|| PathBuf::from("/tmp/xtts-local"))
}

/// Harness config directory.
///
/// Resolves to `dirs::config_dir()/xtts-local/` by default. Override with
/// the `XTTS_LOCAL_CONFIG_DIR` environment variable.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("XTTS_LOCAL_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("xtts-local"))
        .unwrap_or_else(|| PathBuf::from("/tmp/xtts-local-config"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Resolved directory layout rooted at one base directory.
///
/// All provisioning and launch code takes a `Layout` rather than consulting
/// the environment itself, so tests can point the whole pipeline at a
/// temporary directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    base: PathBuf,
}

impl Layout {
    /// Layout rooted at an explicit base directory.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Layout for this invocation: an explicit CLI override wins, then
    /// `XTTS_LOCAL_HOME`, then the platform data directory.
    #[must_use]
    pub fn resolve(cli_override: Option<&Path>) -> Self {
        match cli_override {
            Some(dir) => Self::new(dir),
            None => Self::new(default_base_dir()),
        }
    }

    /// The base directory itself.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    /// Application checkout (`<base>/xtts-webui/`).
    #[must_use]
    pub fn checkout_dir(&self) -> PathBuf {
        self.base.join("xtts-webui")
    }

    /// Extracted model files (`<checkout>/model/`).
    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        self.checkout_dir().join("model")
    }

    /// Probe file marking a populated model directory.
    #[must_use]
    pub fn model_probe(&self) -> PathBuf {
        self.model_dir().join("config.json")
    }

    /// Extracted reference audio (`<base>/voice_samples/`).
    #[must_use]
    pub fn voices_dir(&self) -> PathBuf {
        self.base.join("voice_samples")
    }

    /// Archive downloads in flight (`<base>/temp/`).
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.base.join("temp")
    }

    /// Python virtual environment (`<base>/venv/`).
    #[must_use]
    pub fn venv_dir(&self) -> PathBuf {
        self.base.join("venv")
    }

    /// The venv's interpreter (`bin/python` or `Scripts/python.exe`).
    #[must_use]
    pub fn venv_python(&self) -> PathBuf {
        if cfg!(windows) {
            self.venv_dir().join("Scripts").join("python.exe")
        } else {
            self.venv_dir().join("bin").join("python")
        }
    }

    /// Launcher log files (`<base>/logs/`).
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    /// Compatibility shim file (`<checkout>/utils/compatibility.py`).
    #[must_use]
    pub fn shim_file(&self) -> PathBuf {
        self.checkout_dir().join("utils").join("compatibility.py")
    }

    /// Create every directory the provisioner writes into.
    pub fn ensure_tree(&self) -> std::io::Result<()> {
        for dir in [
            self.base.clone(),
            self.voices_dir(),
            self.temp_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}
