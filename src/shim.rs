//! Compatibility shim for the renamed `LogitsWarper` symbol.
//!
//! The bundled Coqui TTS trainer imports `transformers.LogitsWarper`, which
//! newer transformers releases folded into `LogitsProcessor`. The shim is
//! selected by capability probing: the environment is asked whether the
//! symbol exists, and only when it is absent does the installer
//!
//! 1. write `utils/compatibility.py` into the checkout (imported by the
//!    application at startup), and
//! 2. rewrite the import line of `gpt_trainer.py` under the environment's
//!    site-packages.
//!
//! Every step compares content before writing, so applying the shim N times
//! leaves exactly the state of applying it once.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::Result;
use crate::paths::Layout;

/// The shim file installed into the checkout.
pub const SHIM_SOURCE: &str = r#"# Newer transformers releases removed LogitsWarper; the bundled
# Coqui TTS code still imports it, so alias the equivalent.
import transformers
from transformers.generation.logits_process import LogitsProcessor

if not hasattr(transformers, "LogitsWarper"):
    transformers.LogitsWarper = LogitsProcessor
"#;

/// Location of the Coqui trainer module relative to a site-packages root.
const TRAINER_REL_PATH: &[&str] = &["TTS", "tts", "layers", "xtts", "trainer", "gpt_trainer.py"];

const TRAINER_IMPORT: &str = "from transformers import";
const TRAINER_IMPORT_PATCHED: &str = "from transformers import LogitsProcessor as LogitsWarper,";

/// Outcome of asking the environment whether the symbol exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolProbe {
    /// `transformers.LogitsWarper` resolves — no shim needed.
    Present,
    /// The import works but the symbol is gone.
    Absent,
    /// The probe could not run (no interpreter, transformers not installed).
    Unknown,
}

/// What happened to the shim file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShimFileAction {
    /// Symbol present, file left exactly as found.
    SkippedSymbolPresent,
    /// File written (missing or content differed).
    Written,
    /// File already carried the expected content.
    AlreadyCurrent,
}

/// What happened to the trainer module under site-packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerPatch {
    /// Symbol present, module left alone.
    SkippedSymbolPresent,
    /// Import line rewritten.
    Patched,
    /// Module already mentions the symbol.
    AlreadyPatched,
    /// No trainer module found in any site-packages root.
    NotFound,
}

/// Combined result of one shim application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShimReport {
    /// Probe outcome that drove the decisions below.
    pub probe: SymbolProbe,
    /// Shim file disposition.
    pub file: ShimFileAction,
    /// Trainer module disposition.
    pub trainer: TrainerPatch,
}

/// Ask the interpreter whether `transformers.LogitsWarper` exists.
#[must_use]
pub fn probe_symbol(python: &Path) -> SymbolProbe {
    let output = Command::new(python)
        .arg("-c")
        .arg("import transformers, sys; sys.stdout.write('yes' if hasattr(transformers, 'LogitsWarper') else 'no')")
        .output();

    match output {
        Ok(out) if out.status.success() => {
            match String::from_utf8_lossy(&out.stdout).trim() {
                "yes" => SymbolProbe::Present,
                "no" => SymbolProbe::Absent,
                _ => SymbolProbe::Unknown,
            }
        }
        _ => SymbolProbe::Unknown,
    }
}

/// Apply the compatibility shim to one environment.
///
/// A [`SymbolProbe::Present`] result makes the whole call a no-op: nothing
/// on disk changes. [`SymbolProbe::Unknown`] is treated as absent, since the
/// shim file guards itself with the same `hasattr` check at import time.
///
/// # Errors
///
/// I/O errors reading or writing the shim file or the trainer module.
pub fn apply_shim(python: &Path, layout: &Layout) -> Result<ShimReport> {
    let probe = probe_symbol(python);
    if probe == SymbolProbe::Present {
        tracing::info!("LogitsWarper already provided by transformers, shim not needed");
        return Ok(ShimReport {
            probe,
            file: ShimFileAction::SkippedSymbolPresent,
            trainer: TrainerPatch::SkippedSymbolPresent,
        });
    }

    let file = write_shim_file(&layout.shim_file())?;
    let trainer = patch_trainer(python)?;

    tracing::info!(?file, ?trainer, "compatibility shim applied");
    Ok(ShimReport {
        probe,
        file,
        trainer,
    })
}

/// Write the shim file unless it already carries the expected content.
fn write_shim_file(path: &Path) -> Result<ShimFileAction> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        if existing == SHIM_SOURCE {
            tracing::debug!(path = %path.display(), "shim file already current");
            return Ok(ShimFileAction::AlreadyCurrent);
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, SHIM_SOURCE)?;
    tracing::info!(path = %path.display(), "shim file written");
    Ok(ShimFileAction::Written)
}

/// Rewrite the trainer module's transformers import if it lacks the symbol.
fn patch_trainer(python: &Path) -> Result<TrainerPatch> {
    let Some(trainer_path) = locate_trainer(&site_packages_dirs(python)) else {
        tracing::warn!("gpt_trainer.py not found in site-packages, skipping trainer patch");
        return Ok(TrainerPatch::NotFound);
    };
    patch_trainer_file(&trainer_path)
}

/// Apply the import rewrite to a specific trainer module file.
fn patch_trainer_file(path: &Path) -> Result<TrainerPatch> {
    let content = std::fs::read_to_string(path)?;
    if content.contains("LogitsWarper") {
        tracing::debug!(path = %path.display(), "trainer module already patched");
        return Ok(TrainerPatch::AlreadyPatched);
    }
    let patched = content.replace(TRAINER_IMPORT, TRAINER_IMPORT_PATCHED);
    std::fs::write(path, patched)?;
    tracing::info!(path = %path.display(), "trainer import rewritten");
    Ok(TrainerPatch::Patched)
}

/// The interpreter's site-packages roots, best-effort.
#[must_use]
pub fn site_packages_dirs(python: &Path) -> Vec<PathBuf> {
    let output = Command::new(python)
        .arg("-c")
        .arg("import site; print('\\n'.join(site.getsitepackages()))")
        .output();

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect(),
        _ => Vec::new(),
    }
}

/// First site-packages root holding the trainer module.
fn locate_trainer(roots: &[PathBuf]) -> Option<PathBuf> {
    for root in roots {
        let mut candidate = root.clone();
        for part in TRAINER_REL_PATH {
            candidate.push(part);
        }
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn shim_source_guards_itself() {
        assert!(SHIM_SOURCE.contains("hasattr(transformers, \"LogitsWarper\")"));
        assert!(SHIM_SOURCE.contains("LogitsProcessor"));
    }

    #[test]
    fn write_is_idempotent_over_repeat_runs() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("utils").join("compatibility.py");

        assert_eq!(write_shim_file(&path).expect("first"), ShimFileAction::Written);
        let after_first = std::fs::read_to_string(&path).expect("read");

        for _ in 0..5 {
            assert_eq!(
                write_shim_file(&path).expect("repeat"),
                ShimFileAction::AlreadyCurrent
            );
        }
        let after_many = std::fs::read_to_string(&path).expect("read");
        assert_eq!(after_first, after_many);
    }

    #[test]
    fn write_replaces_divergent_content() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("compatibility.py");
        std::fs::write(&path, "# stale hand-edited shim\n").expect("write");

        assert_eq!(write_shim_file(&path).expect("apply"), ShimFileAction::Written);
        assert_eq!(std::fs::read_to_string(&path).expect("read"), SHIM_SOURCE);
    }

    #[test]
    fn trainer_patch_rewrites_import_once() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("gpt_trainer.py");
        std::fs::write(
            &path,
            "from transformers import GPT2Config, GPT2Model\nclass GPTTrainer:\n    pass\n",
        )
        .expect("write");

        assert_eq!(patch_trainer_file(&path).expect("patch"), TrainerPatch::Patched);
        let content = std::fs::read_to_string(&path).expect("read");
        assert!(content.contains(
            "from transformers import LogitsProcessor as LogitsWarper, GPT2Config, GPT2Model"
        ));

        // Second application sees the symbol and leaves the file alone.
        assert_eq!(
            patch_trainer_file(&path).expect("repeat"),
            TrainerPatch::AlreadyPatched
        );
        let again = std::fs::read_to_string(&path).expect("read");
        assert_eq!(content, again);
    }

    #[test]
    fn trainer_patch_skips_module_mentioning_symbol() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("gpt_trainer.py");
        let original = "from transformers import LogitsWarper\n";
        std::fs::write(&path, original).expect("write");

        assert_eq!(
            patch_trainer_file(&path).expect("patch"),
            TrainerPatch::AlreadyPatched
        );
        assert_eq!(std::fs::read_to_string(&path).expect("read"), original);
    }

    #[test]
    fn locate_trainer_walks_roots_in_order() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let empty_root = tmp.path().join("empty");
        std::fs::create_dir_all(&empty_root).expect("mkdir");

        let full_root = tmp.path().join("site-packages");
        let mut trainer = full_root.clone();
        for part in TRAINER_REL_PATH {
            trainer.push(part);
        }
        std::fs::create_dir_all(trainer.parent().expect("parent")).expect("mkdir");
        std::fs::write(&trainer, "from transformers import GPT2Config\n").expect("write");

        let found = locate_trainer(&[empty_root, full_root]).expect("should find trainer");
        assert_eq!(found, trainer);
    }

    #[test]
    fn locate_trainer_handles_no_roots() {
        assert_eq!(locate_trainer(&[]), None);
    }

    // -----------------------------------------------------------------------
    // probe + apply against stub interpreters (unix only)
    // -----------------------------------------------------------------------

    #[cfg(unix)]
    fn write_stub(dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("python");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).expect("write stub");
        let mut perms = std::fs::metadata(&path).expect("stat stub").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod stub");
        path
    }

    #[cfg(unix)]
    #[test]
    fn probe_parses_stub_answers() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let yes = write_stub(tmp.path(), "printf yes");
        assert_eq!(probe_symbol(&yes), SymbolProbe::Present);

        let no = write_stub(tmp.path(), "printf no");
        assert_eq!(probe_symbol(&no), SymbolProbe::Absent);

        let broken = write_stub(tmp.path(), "exit 1");
        assert_eq!(probe_symbol(&broken), SymbolProbe::Unknown);
    }

    #[test]
    fn probe_without_interpreter_is_unknown() {
        assert_eq!(
            probe_symbol(Path::new("/nonexistent/python")),
            SymbolProbe::Unknown
        );
    }

    #[cfg(unix)]
    #[test]
    fn apply_is_a_noop_when_symbol_present() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = Layout::new(tmp.path().join("base"));
        let python = write_stub(tmp.path(), "printf yes");

        let report = apply_shim(&python, &layout).expect("apply");
        assert_eq!(report.probe, SymbolProbe::Present);
        assert_eq!(report.file, ShimFileAction::SkippedSymbolPresent);
        assert_eq!(report.trainer, TrainerPatch::SkippedSymbolPresent);
        assert!(!layout.shim_file().exists(), "no file may be written");
    }

    #[cfg(unix)]
    #[test]
    fn apply_writes_shim_when_symbol_absent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = Layout::new(tmp.path().join("base"));
        // Stub answers the hasattr probe with no and the site lookup with
        // an empty root list.
        let python = write_stub(
            tmp.path(),
            "case \"$2\" in *hasattr*) printf no;; *) printf '';; esac",
        );

        let report = apply_shim(&python, &layout).expect("apply");
        assert_eq!(report.probe, SymbolProbe::Absent);
        assert_eq!(report.file, ShimFileAction::Written);
        assert_eq!(report.trainer, TrainerPatch::NotFound);
        assert_eq!(
            std::fs::read_to_string(layout.shim_file()).expect("read"),
            SHIM_SOURCE
        );

        // Re-apply: same end state, no rewrite.
        let report = apply_shim(&python, &layout).expect("re-apply");
        assert_eq!(report.file, ShimFileAction::AlreadyCurrent);
    }
}
