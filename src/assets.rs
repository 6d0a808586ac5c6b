//! Asset archive download and extraction.
//!
//! The pretrained model and the reference voice samples ship as opaque zip
//! archives. Each is downloaded once into the temp directory (with a `.part`
//! file renamed into place on completion) and extracted into its target
//! directory. A populated target skips the whole fetch, so re-running setup
//! never produces a second copy.

use std::io::Read;
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{HarnessError, Result};
use crate::paths::Layout;

/// File name the model archive is stored under in the temp directory.
pub const MODEL_ARCHIVE_NAME: &str = "model.zip";

/// File name the voice sample archive is stored under in the temp directory.
pub const VOICES_ARCHIVE_NAME: &str = "vc.zip";

/// How an asset request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetOutcome {
    /// Target already populated, nothing fetched.
    AlreadyPresent,
    /// Archive downloaded (or reused from temp) and extracted.
    Installed,
}

/// Downloads and extracts the two asset archives for one layout.
#[derive(Debug)]
pub struct AssetStore<'a> {
    layout: &'a Layout,
}

impl<'a> AssetStore<'a> {
    /// Store operating on the given layout.
    #[must_use]
    pub fn new(layout: &'a Layout) -> Self {
        Self { layout }
    }

    /// Make sure the model files are present under the checkout.
    ///
    /// The probe is `model/config.json`; when it exists the archive is
    /// neither downloaded nor extracted again.
    ///
    /// # Errors
    ///
    /// [`HarnessError::Download`] on fetch failure,
    /// [`HarnessError::ArchiveCorrupt`] on extraction failure.
    pub fn ensure_model(&self, url: &str) -> Result<AssetOutcome> {
        if self.layout.model_probe().is_file() {
            tracing::info!(dir = %self.layout.model_dir().display(), "model already present");
            return Ok(AssetOutcome::AlreadyPresent);
        }

        let archive = self.layout.temp_dir().join(MODEL_ARCHIVE_NAME);
        download_archive(url, &archive)?;

        let target = self.layout.model_dir();
        std::fs::create_dir_all(&target)?;
        let count = extract_or_discard(&archive, &target)?;
        tracing::info!(count, dir = %target.display(), "model files extracted");

        if !self.layout.model_probe().is_file() {
            tracing::warn!(
                probe = %self.layout.model_probe().display(),
                "model archive extracted but the expected config.json is missing"
            );
        }
        Ok(AssetOutcome::Installed)
    }

    /// Make sure the reference voice samples are present.
    ///
    /// The probe is a non-empty `voice_samples/` directory.
    ///
    /// # Errors
    ///
    /// Same as [`AssetStore::ensure_model`].
    pub fn ensure_voices(&self, url: &str) -> Result<AssetOutcome> {
        let target = self.layout.voices_dir();
        if dir_is_populated(&target) {
            tracing::info!(dir = %target.display(), "voice samples already present");
            return Ok(AssetOutcome::AlreadyPresent);
        }

        let archive = self.layout.temp_dir().join(VOICES_ARCHIVE_NAME);
        download_archive(url, &archive)?;

        std::fs::create_dir_all(&target)?;
        let count = extract_or_discard(&archive, &target)?;
        tracing::info!(count, dir = %target.display(), "voice samples extracted");
        Ok(AssetOutcome::Installed)
    }
}

/// Extract, dropping the archive on failure so the next run fetches a
/// fresh copy instead of reusing a bad one.
fn extract_or_discard(archive: &Path, target: &Path) -> Result<usize> {
    match extract_archive(archive, target) {
        Ok(count) => Ok(count),
        Err(e) => {
            let _ = std::fs::remove_file(archive);
            Err(e)
        }
    }
}

/// True when the directory exists and holds at least one entry.
#[must_use]
pub fn dir_is_populated(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Download `url` to `dest` with a visible progress bar.
///
/// An existing `dest` is reused without a network touch. The body streams
/// into `dest.part`, renamed over `dest` only on completion, so an
/// interrupted transfer never leaves a plausible-looking archive behind.
///
/// # Errors
///
/// [`HarnessError::Download`] on connection or read failure.
pub fn download_archive(url: &str, dest: &Path) -> Result<()> {
    let filename = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_owned());

    if dest.exists() {
        println!("  {filename}  [cached]");
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template(
        "  {msg} [{bar:30}] {bytes}/{total_bytes} {bytes_per_sec} ETA {eta}",
    ) {
        pb.set_style(style);
    }
    pb.set_message(filename);

    let resp = ureq::get(url).call().map_err(|e| HarnessError::Download {
        url: url.to_owned(),
        reason: e.to_string(),
    })?;

    let total_bytes = resp
        .header("content-length")
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(len) = total_bytes {
        pb.set_length(len);
    }

    // Write to a temp file then rename (atomic-ish on same filesystem).
    let tmp = dest.with_extension("part");
    let mut file = std::fs::File::create(&tmp)?;
    let mut reader = resp.into_reader();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(|e| HarnessError::Download {
            url: url.to_owned(),
            reason: format!("read error: {e}"),
        })?;
        if n == 0 {
            break;
        }
        std::io::Write::write_all(&mut file, &buf[..n])?;
        pb.inc(n as u64);
    }
    pb.finish();

    std::fs::rename(&tmp, dest)?;
    Ok(())
}

/// Extract a zip archive into `target`, overwriting existing files.
///
/// Entries whose paths would escape `target` are skipped. Returns the
/// number of files written.
///
/// # Errors
///
/// [`HarnessError::ArchiveCorrupt`] when the archive cannot be opened or an
/// entry cannot be read.
pub fn extract_archive(archive: &Path, target: &Path) -> Result<usize> {
    let archive_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| archive.display().to_string());

    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| HarnessError::ArchiveCorrupt {
        archive: archive_name.clone(),
        reason: format!("zip error: {e}"),
    })?;

    let mut extracted = 0usize;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| HarnessError::ArchiveCorrupt {
            archive: archive_name.clone(),
            reason: format!("zip entry error: {e}"),
        })?;

        let Some(rel) = entry.enclosed_name() else {
            tracing::warn!(name = entry.name(), "skipping archive entry with unsafe path");
            continue;
        };
        let out = target.join(rel);

        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out_file = std::fs::File::create(&out)?;
        std::io::copy(&mut entry, &mut out_file).map_err(|e| HarnessError::ArchiveCorrupt {
            archive: archive_name.clone(),
            reason: format!("failed to extract {}: {e}", entry.name()),
        })?;
        extracted += 1;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&out, std::fs::Permissions::from_mode(mode));
        }
    }
    Ok(extracted)
}
