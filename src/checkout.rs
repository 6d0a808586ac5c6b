//! Application checkout management via the system `git` binary.
//!
//! The external GUI application is distributed as a Hugging Face Space; the
//! provisioner clones it once and keeps re-runs idempotent. An existing
//! valid checkout is updated best-effort, an occupied non-git directory is
//! refused, and a second clone of the same target never happens.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{HarnessError, Result};

/// What currently occupies the checkout directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutState {
    /// Directory absent or empty — safe to clone into.
    Missing,
    /// A git checkout (`.git` present).
    Valid,
    /// Non-empty directory without `.git` — not ours to touch.
    Foreign,
}

/// How [`CheckoutManager::ensure`] satisfied the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutOutcome {
    /// Fresh clone performed.
    Cloned,
    /// Existing checkout fast-forwarded.
    Updated,
    /// Existing checkout kept as-is after a failed update.
    StaleKept,
}

/// Inspect the checkout directory without touching it.
#[must_use]
pub fn probe(dir: &Path) -> CheckoutState {
    if !dir.exists() {
        return CheckoutState::Missing;
    }
    if dir.join(".git").exists() {
        return CheckoutState::Valid;
    }
    let occupied = std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    if occupied {
        CheckoutState::Foreign
    } else {
        CheckoutState::Missing
    }
}

/// Discover a usable `git` binary.
///
/// Probes `explicit_path`, then `PATH` via [`which::which`], then common
/// system prefixes. Returns the first candidate present on disk.
#[must_use]
pub fn discover_git(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit_path {
        if p.is_file() {
            return Some(p.to_path_buf());
        }
    }
    if let Ok(found) = which::which("git") {
        return Some(found);
    }
    for fallback in ["/usr/bin/git", "/usr/local/bin/git", "/opt/homebrew/bin/git"] {
        let candidate = PathBuf::from(fallback);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Clones and updates the application checkout.
#[derive(Debug, Clone)]
pub struct CheckoutManager {
    git: PathBuf,
    repo_url: String,
}

impl CheckoutManager {
    /// Manager bound to a git binary and a remote URL.
    #[must_use]
    pub fn new(git: impl Into<PathBuf>, repo_url: impl Into<String>) -> Self {
        Self {
            git: git.into(),
            repo_url: repo_url.into(),
        }
    }

    /// Make sure `dir` holds a checkout of the remote.
    ///
    /// - Missing or empty directory: clone.
    /// - Valid checkout: `git pull --ff-only`, best-effort. A failed pull
    ///   keeps the existing tree and logs a warning, since a stale checkout
    ///   still launches.
    /// - Occupied non-git directory: refused.
    ///
    /// # Errors
    ///
    /// [`HarnessError::SourceUnavailable`] when the clone fails (remote
    /// unreachable, bad URL) or the directory is occupied by something else.
    pub fn ensure(&self, dir: &Path) -> Result<CheckoutOutcome> {
        match probe(dir) {
            CheckoutState::Missing => {
                tracing::info!(url = %self.repo_url, dir = %dir.display(), "cloning application");
                if let Some(parent) = dir.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let output = self.run_git(&["clone", &self.repo_url, &dir.display().to_string()])?;
                if output.status.success() {
                    Ok(CheckoutOutcome::Cloned)
                } else {
                    Err(HarnessError::SourceUnavailable {
                        target: dir.display().to_string(),
                        reason: stderr_excerpt(&output.stderr),
                    })
                }
            }
            CheckoutState::Valid => {
                tracing::info!(dir = %dir.display(), "updating existing checkout");
                let dir_arg = dir.display().to_string();
                let output = self.run_git(&["-C", &dir_arg, "pull", "--ff-only"])?;
                if output.status.success() {
                    Ok(CheckoutOutcome::Updated)
                } else {
                    tracing::warn!(
                        dir = %dir.display(),
                        detail = %stderr_excerpt(&output.stderr),
                        "checkout update failed, keeping existing tree"
                    );
                    Ok(CheckoutOutcome::StaleKept)
                }
            }
            CheckoutState::Foreign => Err(HarnessError::SourceUnavailable {
                target: dir.display().to_string(),
                reason: "directory exists but is not a git checkout".to_owned(),
            }),
        }
    }

    fn run_git(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new(&self.git)
            .args(args)
            .output()
            .map_err(|e| HarnessError::SourceUnavailable {
                target: self.repo_url.clone(),
                reason: format!("failed to execute {}: {e}", self.git.display()),
            })
    }
}

/// Compact one-line excerpt of a git invocation's stderr.
fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    match lines.next_back() {
        Some(last) => last.to_owned(),
        None => "git exited non-zero with no output".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn probe_missing_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(probe(&dir.path().join("absent")), CheckoutState::Missing);
    }

    #[test]
    fn probe_empty_directory_counts_as_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(probe(dir.path()), CheckoutState::Missing);
    }

    #[test]
    fn probe_valid_checkout() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join(".git")).expect("mkdir .git");
        assert_eq!(probe(dir.path()), CheckoutState::Valid);
    }

    #[test]
    fn probe_foreign_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("somefile.txt"), "contents").expect("write");
        assert_eq!(probe(dir.path()), CheckoutState::Foreign);
    }

    #[test]
    fn discover_git_with_nonexistent_explicit_path() {
        // Explicit path that does not exist falls through to PATH lookup.
        let found = discover_git(Some(Path::new("/nonexistent/git")));
        if let Some(git) = found {
            assert!(git.is_file());
        }
    }

    #[test]
    fn stderr_excerpt_takes_last_nonempty_line() {
        let stderr = b"Cloning into 'xtts-webui'...\nfatal: unable to access remote\n\n";
        assert_eq!(stderr_excerpt(stderr), "fatal: unable to access remote");
    }

    #[test]
    fn stderr_excerpt_handles_empty_output() {
        assert!(stderr_excerpt(b"").contains("no output"));
    }

    // -----------------------------------------------------------------------
    // ensure — with stub git (unix only)
    // -----------------------------------------------------------------------

    #[cfg(unix)]
    fn write_stub(dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("git");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).expect("write stub");
        let mut perms = std::fs::metadata(&path).expect("stat stub").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod stub");
        path
    }

    #[cfg(unix)]
    #[test]
    fn ensure_clones_into_missing_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        // Stub clone: create the destination with a .git marker.
        let stub = write_stub(
            tmp.path(),
            "if [ \"$1\" = clone ]; then mkdir -p \"$3/.git\"; exit 0; fi; exit 1",
        );
        let target = tmp.path().join("checkout");
        let manager = CheckoutManager::new(&stub, "https://example.com/repo");
        let outcome = manager.ensure(&target).expect("clone should succeed");
        assert_eq!(outcome, CheckoutOutcome::Cloned);
        assert_eq!(probe(&target), CheckoutState::Valid);
    }

    #[cfg(unix)]
    #[test]
    fn ensure_maps_clone_failure_to_source_unavailable() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let stub = write_stub(tmp.path(), "echo 'fatal: could not resolve host' >&2; exit 128");
        let target = tmp.path().join("checkout");
        let manager = CheckoutManager::new(&stub, "https://example.com/repo");
        let err = manager.ensure(&target).expect_err("clone should fail");
        match err {
            HarnessError::SourceUnavailable { target: t, reason } => {
                assert!(t.ends_with("checkout"));
                assert!(reason.contains("could not resolve host"));
            }
            other => panic!("unexpected error variant: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn ensure_updates_existing_checkout() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let target = tmp.path().join("checkout");
        std::fs::create_dir_all(target.join(".git")).expect("mkdir");
        let stub = write_stub(tmp.path(), "exit 0");
        let manager = CheckoutManager::new(&stub, "https://example.com/repo");
        let outcome = manager.ensure(&target).expect("update should succeed");
        assert_eq!(outcome, CheckoutOutcome::Updated);
    }

    #[cfg(unix)]
    #[test]
    fn ensure_keeps_checkout_when_pull_fails() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let target = tmp.path().join("checkout");
        std::fs::create_dir_all(target.join(".git")).expect("mkdir");
        std::fs::write(target.join("app.py"), "import gradio").expect("write");
        let stub = write_stub(tmp.path(), "echo 'fatal: no network' >&2; exit 1");
        let manager = CheckoutManager::new(&stub, "https://example.com/repo");
        let outcome = manager.ensure(&target).expect("stale checkout is not an error");
        assert_eq!(outcome, CheckoutOutcome::StaleKept);
        assert!(target.join("app.py").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn ensure_refuses_foreign_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let target = tmp.path().join("checkout");
        std::fs::create_dir_all(&target).expect("mkdir");
        std::fs::write(target.join("unrelated.txt"), "data").expect("write");
        let stub = write_stub(tmp.path(), "exit 0");
        let manager = CheckoutManager::new(&stub, "https://example.com/repo");
        let err = manager.ensure(&target).expect_err("foreign dir must be refused");
        match err {
            HarnessError::SourceUnavailable { reason, .. } => {
                assert!(reason.contains("not a git checkout"));
            }
            other => panic!("unexpected error variant: {other}"),
        }
    }
}
