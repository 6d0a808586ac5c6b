//! Python interpreter discovery, virtual environments, and package installs.
//!
//! Probes well-known locations for a Python binary, validates it against the
//! minimum supported version, creates the virtual environment, and drives
//! `pip` for the pinned manifest and the checkout's `requirements.txt`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{HarnessError, Result};
use crate::manifest::{self, Manifest};
use crate::paths::Layout;

/// Minimum Python version the application checkout supports.
pub const MINIMUM_PYTHON_VERSION: &str = "3.9";

/// Information about a discovered Python installation.
#[derive(Debug, Clone)]
pub struct PythonInfo {
    /// Absolute path to the interpreter.
    pub path: PathBuf,
    /// Parsed version string (e.g. `"3.11.4"`).
    pub version: String,
}

/// Python binary discovery and version validation.
///
/// Stateless — all methods are associated functions.
pub struct PythonBootstrap;

impl PythonBootstrap {
    /// Discover a usable Python interpreter.
    ///
    /// Probes locations in this order:
    /// 1. `explicit_path` (if provided)
    /// 2. `python3` on `PATH` via [`which::which`]
    /// 3. `python` on `PATH`
    /// 4. `~/.local/bin/python3`
    /// 5. `/usr/local/bin/python3`
    /// 6. `/opt/homebrew/bin/python3`
    ///
    /// For each candidate found on disk, runs `--version` and validates the
    /// output against [`MINIMUM_PYTHON_VERSION`].
    ///
    /// # Errors
    ///
    /// - [`HarnessError::InterpreterNotFound`] if no binary answers the probe.
    /// - [`HarnessError::InterpreterTooOld`] if a binary answers but its
    ///   version is below the minimum.
    pub fn discover(explicit_path: Option<&Path>) -> Result<PythonInfo> {
        let candidates = Self::build_candidate_list(explicit_path);

        for candidate in &candidates {
            if !candidate.is_file() {
                continue;
            }

            match Self::probe_version(candidate) {
                Ok(version) => {
                    if version_at_least(&version, MINIMUM_PYTHON_VERSION) {
                        return Ok(PythonInfo {
                            path: candidate.clone(),
                            version,
                        });
                    }
                    return Err(HarnessError::InterpreterTooOld {
                        found: version,
                        minimum: MINIMUM_PYTHON_VERSION.to_owned(),
                    });
                }
                Err(_) => {
                    // Binary exists but the version probe failed — skip to next.
                    continue;
                }
            }
        }

        Err(HarnessError::InterpreterNotFound {
            reason: format!(
                "searched {} location(s): {}",
                candidates.len(),
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        })
    }

    /// Build the ordered list of candidate paths to probe.
    fn build_candidate_list(explicit_path: Option<&Path>) -> Vec<PathBuf> {
        let mut candidates = Vec::with_capacity(6);

        // 1. Explicit config path.
        if let Some(p) = explicit_path {
            candidates.push(p.to_path_buf());
        }

        // 2. PATH lookups, python3 preferred over the bare name.
        if let Ok(found) = which::which("python3") {
            candidates.push(found);
        }
        if let Ok(found) = which::which("python") {
            candidates.push(found);
        }

        // 3. ~/.local/bin/python3
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".local/bin/python3"));
        }

        // 4. Common system prefixes.
        candidates.push(PathBuf::from("/usr/local/bin/python3"));
        candidates.push(PathBuf::from("/opt/homebrew/bin/python3"));

        candidates
    }

    /// Run `<python> --version` and parse the version from the output.
    fn probe_version(python_path: &Path) -> Result<String> {
        let output = Command::new(python_path)
            .arg("--version")
            .output()
            .map_err(|e| HarnessError::InterpreterNotFound {
                reason: format!("failed to execute {}: {e}", python_path.display()),
            })?;

        if !output.status.success() {
            return Err(HarnessError::InterpreterNotFound {
                reason: format!(
                    "{} --version exited with {}",
                    python_path.display(),
                    output.status
                ),
            });
        }

        // Python 2 printed its version to stderr.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let text = if stdout.trim().is_empty() { stderr } else { stdout };

        parse_python_version(&text).ok_or_else(|| HarnessError::InterpreterNotFound {
            reason: format!("could not parse version from `--version` output: {text}"),
        })
    }
}

/// Parse a version string from `python --version` output.
///
/// Expected formats:
/// - `"Python 3.11.4"`
/// - `"Python 3.13.0b1"`
/// - `"3.9.18"`
///
/// Returns the version portion (e.g. `"3.11.4"`) or `None` if unparseable.
#[must_use]
pub fn parse_python_version(output: &str) -> Option<String> {
    let trimmed = output.trim();

    // Strip optional "Python " prefix.
    let version_part = trimmed.strip_prefix("Python ").unwrap_or(trimmed);

    let version = version_part
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()?
        .trim();

    if version.is_empty() {
        return None;
    }

    if !version.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    Some(version.to_owned())
}

/// Compare two dotted version strings (e.g. `"3.11.4"` >= `"3.9"`).
///
/// Compares numeric components left-to-right. Non-numeric components (such
/// as a `0b1` beta suffix) are skipped. Missing trailing components are
/// treated as zero.
#[must_use]
pub fn version_at_least(version: &str, minimum: &str) -> bool {
    let parse = |s: &str| -> Vec<u64> {
        let base = s.split('-').next().unwrap_or(s);
        base.split('.')
            .filter_map(|part| part.parse::<u64>().ok())
            .collect()
    };

    let v = parse(version);
    let m = parse(minimum);

    let len = v.len().max(m.len());
    for i in 0..len {
        let vn = v.get(i).copied().unwrap_or(0);
        let mn = m.get(i).copied().unwrap_or(0);
        match vn.cmp(&mn) {
            std::cmp::Ordering::Greater => return true,
            std::cmp::Ordering::Less => return false,
            std::cmp::Ordering::Equal => continue,
        }
    }
    true // equal
}

/// Create the layout's virtual environment if it does not already exist.
///
/// Returns the path to the venv's interpreter. An existing venv whose
/// interpreter is present is reused untouched.
///
/// # Errors
///
/// [`HarnessError::InstallFailed`] if `python -m venv` fails or the created
/// environment has no interpreter.
pub fn ensure_venv(python: &Path, layout: &Layout) -> Result<PathBuf> {
    let venv_python = layout.venv_python();
    if venv_python.is_file() {
        tracing::debug!(path = %venv_python.display(), "reusing existing virtual environment");
        return Ok(venv_python);
    }

    tracing::info!(dir = %layout.venv_dir().display(), "creating virtual environment");
    let output = Command::new(python)
        .arg("-m")
        .arg("venv")
        .arg(layout.venv_dir())
        .output()
        .map_err(|e| HarnessError::InstallFailed {
            context: "virtual environment".to_owned(),
            detail: format!("failed to execute {}: {e}", python.display()),
        })?;

    if !output.status.success() {
        return Err(HarnessError::InstallFailed {
            context: "virtual environment".to_owned(),
            detail: stderr_tail(&String::from_utf8_lossy(&output.stderr), 10),
        });
    }

    if !venv_python.is_file() {
        return Err(HarnessError::InstallFailed {
            context: "virtual environment".to_owned(),
            detail: format!("no interpreter at {} after creation", venv_python.display()),
        });
    }

    Ok(venv_python)
}

/// Drives `pip` inside one interpreter (normally the venv's).
#[derive(Debug, Clone)]
pub struct Installer {
    python: PathBuf,
}

impl Installer {
    /// Installer bound to the given interpreter.
    #[must_use]
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
        }
    }

    /// The interpreter this installer runs pip under.
    #[must_use]
    pub fn python(&self) -> &Path {
        &self.python
    }

    /// Upgrade pip itself before the real installs.
    ///
    /// # Errors
    ///
    /// [`HarnessError::InstallFailed`] on a non-zero exit.
    pub fn upgrade_pip(&self) -> Result<()> {
        self.run_pip("pip upgrade", &["install", "--upgrade", "pip"])
    }

    /// Install the manifest's pins, in order.
    ///
    /// # Errors
    ///
    /// [`HarnessError::VersionConflict`] when pip reports an unsatisfiable
    /// resolution, [`HarnessError::InstallFailed`] for any other failure.
    pub fn install_pins(&self, manifest: &Manifest) -> Result<()> {
        let specs = manifest.specifiers();
        let mut args = vec!["install"];
        args.extend(specs.iter().map(String::as_str));
        self.run_pip("pinned packages", &args)
    }

    /// Install the checkout's `requirements.txt` when it exists.
    ///
    /// The pinned manifest installs first, so pins win any overlap pip
    /// would otherwise re-resolve. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Same as [`Installer::install_pins`].
    pub fn install_requirements(&self, requirements: &Path) -> Result<()> {
        if !requirements.is_file() {
            tracing::debug!(path = %requirements.display(), "no requirements file, skipping");
            return Ok(());
        }
        let path = requirements.display().to_string();
        self.run_pip("requirements.txt", &["install", "-r", &path])
    }

    /// Run `pip` with the given arguments, relaying its stdout live and
    /// mapping failures from captured stderr.
    fn run_pip(&self, context: &str, args: &[&str]) -> Result<()> {
        tracing::info!(%context, "running pip {}", args.join(" "));
        let output = Command::new(&self.python)
            .arg("-m")
            .arg("pip")
            .args(args)
            .stdout(Stdio::inherit())
            .output()
            .map_err(|e| HarnessError::InstallFailed {
                context: context.to_owned(),
                detail: format!("failed to execute {}: {e}", self.python.display()),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if let Some(conflict) = manifest::conflict_from_pip_stderr(&stderr) {
            return Err(conflict);
        }
        Err(HarnessError::InstallFailed {
            context: context.to_owned(),
            detail: stderr_tail(&stderr, 15),
        })
    }
}

/// Last `n` non-empty lines of a command's captured stderr.
fn stderr_tail(stderr: &str, n: usize) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
