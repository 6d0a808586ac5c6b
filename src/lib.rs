//! xtts-local: one-command deployment and launch of the XTTS web UI.
//!
//! This crate provisions a self-contained install of the XTTS text-to-speech
//! web interface and runs it:
//! Manifest → venv → pinned packages → checkout → archives → shim → launch
//!
//! # Architecture
//!
//! Three phases, each safe to repeat:
//! - **Provisioning**: interpreter discovery, venv, pinned packages, git
//!   checkout, and model archives ([`setup`])
//! - **Compatibility shim**: restores `transformers.LogitsWarper` for the
//!   bundled trainer code when the installed release dropped it ([`shim`])
//! - **Launch**: runs the Gradio entry script under the venv and relays its
//!   output ([`launcher`])

pub mod assets;
pub mod checkout;
pub mod config;
pub mod doctor;
pub mod error;
pub mod launcher;
pub mod manifest;
pub mod paths;
pub mod python;
pub mod setup;
pub mod shim;

pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use launcher::LaunchOptions;
pub use manifest::Manifest;
pub use paths::Layout;
pub use setup::{SetupOptions, SetupSummary};
