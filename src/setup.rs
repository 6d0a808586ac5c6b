//! One-shot environment provisioning.
//!
//! Call [`run_setup`] to take a machine from nothing to a launchable XTTS
//! web UI: interpreter discovery, venv creation, pinned package installs,
//! source checkout, asset downloads, and the transformers compatibility
//! shim, in that order. The dependency manifest is validated before
//! anything touches the network.

use std::path::{Path, PathBuf};

use crate::assets::{AssetOutcome, AssetStore};
use crate::checkout::{self, CheckoutManager, CheckoutOutcome};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::manifest::Manifest;
use crate::paths::Layout;
use crate::python::{Installer, PythonBootstrap, PythonInfo, ensure_venv};
use crate::shim::{self, ShimFileAction, ShimReport};

/// Free space below which a pre-download warning is emitted (8 GiB).
///
/// The two archives expand to several gigabytes on top of the venv.
const DOWNLOAD_SPACE_FLOOR: u64 = 8 * 1024 * 1024 * 1024;

/// CLI-facing switches for the setup flow.
#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    /// Skip the model and voice archive downloads.
    pub skip_download: bool,
    /// Install into the discovered interpreter instead of a venv.
    pub system_python: bool,
    /// Interpreter to try before the usual discovery candidates.
    pub python: Option<PathBuf>,
    /// git executable to try before the usual discovery candidates.
    pub git: Option<PathBuf>,
}

/// Final disposition of one asset after setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetStatus {
    /// Downloaded and extracted this run.
    Installed,
    /// Populated target found, nothing fetched.
    AlreadyPresent,
    /// Left out on request.
    Skipped,
}

impl From<AssetOutcome> for AssetStatus {
    fn from(outcome: AssetOutcome) -> Self {
        match outcome {
            AssetOutcome::Installed => Self::Installed,
            AssetOutcome::AlreadyPresent => Self::AlreadyPresent,
        }
    }
}

/// What each setup phase concluded.
#[derive(Debug)]
pub struct SetupSummary {
    /// Host interpreter that passed the version gate.
    pub python: PythonInfo,
    /// Interpreter the packages went into (venv or system).
    pub install_python: PathBuf,
    /// Checkout disposition.
    pub checkout: CheckoutOutcome,
    /// Model archive disposition.
    pub model: AssetStatus,
    /// Voice sample archive disposition.
    pub voices: AssetStatus,
    /// Compatibility shim report.
    pub shim: ShimReport,
}

/// Run the full provisioning flow.
///
/// Idempotent: a second run reuses the venv, fast-forwards the checkout,
/// skips populated assets, and leaves a current shim untouched.
///
/// # Errors
///
/// The first failing phase aborts the run: [`HarnessError::VersionConflict`]
/// for a self-contradictory manifest (raised before any network traffic),
/// interpreter and install errors, [`HarnessError::SourceUnavailable`] for
/// checkout failures, and download or archive errors for the assets.
pub fn run_setup(
    config: &HarnessConfig,
    layout: &Layout,
    manifest: &Manifest,
    options: &SetupOptions,
) -> Result<SetupSummary> {
    // --- Phase 1: validate the dependency plan ---
    manifest.validate()?;
    tracing::info!(pins = manifest.pins().len(), "dependency manifest validated");

    // --- Phase 2: directory layout ---
    layout.ensure_tree()?;
    tracing::info!(base = %layout.base_dir().display(), "working tree ready");

    // --- Phase 3: interpreter ---
    println!("\nChecking Python...");
    let python = PythonBootstrap::discover(options.python.as_deref())?;
    println!("  {} ({})", python.path.display(), python.version);

    let install_python = if options.system_python {
        tracing::warn!("installing into the system interpreter, venv skipped");
        python.path.clone()
    } else {
        ensure_venv(&python.path, layout)?
    };

    // --- Phase 4: pinned dependencies ---
    println!("\nInstalling dependencies...");
    let installer = Installer::new(install_python.clone());
    installer.upgrade_pip()?;
    installer.install_pins(manifest)?;

    // --- Phase 5: source checkout ---
    println!("\nFetching the web UI...");
    let git = checkout::discover_git(options.git.as_deref()).ok_or_else(|| {
        HarnessError::SourceUnavailable {
            target: config.sources.repo_url.clone(),
            reason: "git executable not found on PATH".to_owned(),
        }
    })?;
    let manager = CheckoutManager::new(git, config.sources.repo_url.clone());
    let checkout_outcome = manager.ensure(&layout.checkout_dir())?;
    installer.install_requirements(&layout.checkout_dir().join("requirements.txt"))?;

    // --- Phase 6: model and voice assets ---
    let (model, voices) = if options.skip_download {
        println!("\nSkipping asset downloads.");
        (AssetStatus::Skipped, AssetStatus::Skipped)
    } else {
        println!("\nFetching assets...");
        warn_if_low_disk(&layout.base_dir());
        let store = AssetStore::new(layout);
        let model = store.ensure_model(&config.sources.model_url)?;
        let voices = store.ensure_voices(&config.sources.voices_url)?;
        (model.into(), voices.into())
    };

    // --- Phase 7: compatibility shim ---
    println!("\nChecking the transformers shim...");
    let shim = shim::apply_shim(&install_python, layout)?;

    system_tool_hints();

    let summary = SetupSummary {
        python,
        install_python,
        checkout: checkout_outcome,
        model,
        voices,
        shim,
    };
    print_summary(&summary, layout);
    Ok(summary)
}

/// Point out missing system tools the web UI relies on at runtime.
fn system_tool_hints() {
    if which::which("ffmpeg").is_err() {
        tracing::warn!("ffmpeg not found on PATH, audio conversion in the web UI may fail");
    }
}

fn warn_if_low_disk(base: &Path) {
    match available_disk_space(base) {
        Ok(free) if free < DOWNLOAD_SPACE_FLOOR => {
            tracing::warn!(
                free_gb = free / 1_000_000_000,
                "low disk space for the model archives"
            );
        }
        Ok(_) => {}
        Err(e) => tracing::debug!("disk space check failed: {e}"),
    }
}

/// Query free disk space at `path`.
///
/// Uses `statvfs` on Unix; other platforms report `u64::MAX` so the check
/// is effectively skipped.
///
/// # Errors
///
/// Returns an error if the filesystem stats cannot be read.
#[cfg(unix)]
pub fn available_disk_space(path: &Path) -> Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    // f_bavail is the blocks available to unprivileged users. The casts are
    // platform-dependent (i32/i64 on macOS, u64 on Linux).
    let bavail: u64 = stat.f_bavail as _;
    let frsize: u64 = stat.f_frsize as _;
    Ok(bavail.wrapping_mul(frsize))
}

/// Fallback for non-Unix platforms.
#[cfg(not(unix))]
pub fn available_disk_space(_path: &Path) -> Result<u64> {
    Ok(u64::MAX)
}

fn print_summary(summary: &SetupSummary, layout: &Layout) {
    println!("\nSetup complete.");
    println!("  python   : {}", summary.install_python.display());
    println!(
        "  checkout : {} ({})",
        layout.checkout_dir().display(),
        checkout_word(summary.checkout)
    );
    println!("  model    : {}", asset_word(summary.model));
    println!("  voices   : {}", asset_word(summary.voices));
    println!("  shim     : {}", shim_word(&summary.shim));
    println!("\nStart the web UI with: xtts-local run");
}

fn checkout_word(outcome: CheckoutOutcome) -> &'static str {
    match outcome {
        CheckoutOutcome::Cloned => "cloned",
        CheckoutOutcome::Updated => "updated",
        CheckoutOutcome::StaleKept => "kept, update failed",
    }
}

fn asset_word(status: AssetStatus) -> &'static str {
    match status {
        AssetStatus::Installed => "installed",
        AssetStatus::AlreadyPresent => "already present",
        AssetStatus::Skipped => "skipped",
    }
}

fn shim_word(report: &ShimReport) -> &'static str {
    match report.file {
        ShimFileAction::SkippedSymbolPresent => "not needed, symbol present",
        ShimFileAction::Written => "installed",
        ShimFileAction::AlreadyCurrent => "already current",
    }
}
