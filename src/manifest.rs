//! Pinned dependency manifest parsing and validation.
//!
//! The provisioner installs an exact, ordered set of `name==version` pins.
//! Validation runs before any network operation so that an inconsistent
//! manifest fails fast, without touching the checkout or the archives.

use crate::error::{HarnessError, Result};

/// The pinned package set the application checkout is known to work with.
pub const DEFAULT_PINS: &[&str] = &[
    "transformers==4.33.0",
    "pandas==1.5.3",
    "fastapi==0.103.1",
    "pydantic==2.3.0",
    "gradio==4.44.1",
    "ctranslate2==4.4.0",
];

/// One exact dependency pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    /// The package name as written in the specifier.
    pub name: String,
    /// The exact pinned version.
    pub version: String,
}

impl Pin {
    /// Parse a `name==version` specifier.
    ///
    /// Expected formats:
    /// - `"transformers==4.33.0"`
    /// - `" pandas == 1.5.3 "` (whitespace tolerated)
    ///
    /// Only exact pins are accepted. Ranges (`>=`, `~=`), bare names, and
    /// empty components are rejected.
    ///
    /// # Errors
    ///
    /// [`HarnessError::InvalidSpecifier`] if the string is not an exact pin.
    pub fn parse(spec: &str) -> Result<Self> {
        let trimmed = spec.trim();
        let (name, version) = trimmed
            .split_once("==")
            .ok_or_else(|| HarnessError::InvalidSpecifier {
                spec: spec.to_owned(),
            })?;

        let name = name.trim();
        let version = version.trim();
        let name_ok = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        let version_ok =
            !version.is_empty() && version.starts_with(|c: char| c.is_ascii_digit());

        if !name_ok || !version_ok {
            return Err(HarnessError::InvalidSpecifier {
                spec: spec.to_owned(),
            });
        }

        Ok(Self {
            name: name.to_owned(),
            version: version.to_owned(),
        })
    }

    /// Package name normalized for comparison (PEP 503: lowercase,
    /// runs of `-`, `_`, `.` collapse to a single `-`).
    #[must_use]
    pub fn normalized_name(&self) -> String {
        let mut out = String::with_capacity(self.name.len());
        let mut prev_sep = false;
        for c in self.name.chars() {
            if matches!(c, '-' | '_' | '.') {
                if !prev_sep {
                    out.push('-');
                }
                prev_sep = true;
            } else {
                out.push(c.to_ascii_lowercase());
                prev_sep = false;
            }
        }
        out
    }

    /// The `name==version` form handed to the installer.
    #[must_use]
    pub fn specifier(&self) -> String {
        format!("{}=={}", self.name, self.version)
    }
}

/// An ordered list of exact pins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pins: Vec<Pin>,
}

impl Manifest {
    /// The built-in manifest ([`DEFAULT_PINS`]).
    #[must_use]
    pub fn pinned() -> Self {
        let pins = DEFAULT_PINS
            .iter()
            .filter_map(|spec| Pin::parse(spec).ok())
            .collect();
        Self { pins }
    }

    /// Parse a manifest from specifier strings, preserving order.
    ///
    /// # Errors
    ///
    /// [`HarnessError::InvalidSpecifier`] for the first malformed entry.
    pub fn parse(specs: &[&str]) -> Result<Self> {
        let mut pins = Vec::with_capacity(specs.len());
        for spec in specs {
            pins.push(Pin::parse(spec)?);
        }
        Ok(Self { pins })
    }

    /// The pins in install order.
    #[must_use]
    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    /// Specifier strings in install order, for the installer's argv.
    #[must_use]
    pub fn specifiers(&self) -> Vec<String> {
        self.pins.iter().map(Pin::specifier).collect()
    }

    /// Check that no package is pinned to two different versions.
    ///
    /// Names are compared normalized, so `FastAPI` and `fastapi` count as
    /// the same package. An exact duplicate entry is harmless and accepted.
    ///
    /// # Errors
    ///
    /// [`HarnessError::VersionConflict`] naming the package and both versions.
    pub fn validate(&self) -> Result<()> {
        let mut seen: Vec<(String, &Pin)> = Vec::with_capacity(self.pins.len());
        for pin in &self.pins {
            let key = pin.normalized_name();
            if let Some((_, first)) = seen.iter().find(|(k, _)| *k == key) {
                if first.version != pin.version {
                    return Err(HarnessError::VersionConflict {
                        package: first.name.clone(),
                        pinned: first.version.clone(),
                        conflicting: pin.version.clone(),
                    });
                }
            } else {
                seen.push((key, pin));
            }
        }
        Ok(())
    }
}

/// Recognize a pip dependency-resolution failure in captured stderr.
///
/// pip reports unsatisfiable constraints with its `ResolutionImpossible`
/// error, usually alongside a `Cannot install a==1 and a==2` line.
#[must_use]
pub fn is_resolver_failure(stderr: &str) -> bool {
    stderr.contains("ResolutionImpossible")
        || stderr.contains("conflicting dependencies")
        || stderr.contains("Cannot install")
}

/// Map a pip resolution failure to a [`HarnessError::VersionConflict`].
///
/// Extracts the first two `name==version` tokens from the output. Returns
/// `None` when the output is not a resolution failure or names no pins the
/// caller could report (the caller then falls back to an install error
/// carrying the raw output).
#[must_use]
pub fn conflict_from_pip_stderr(stderr: &str) -> Option<HarnessError> {
    if !is_resolver_failure(stderr) {
        return None;
    }

    let mut found: Vec<Pin> = Vec::new();
    for token in stderr.split(|c: char| c.is_whitespace() || matches!(c, ',' | '(' | ')')) {
        if let Ok(pin) = Pin::parse(token) {
            if !found.iter().any(|p| p == &pin) {
                found.push(pin);
            }
            if found.len() == 2 {
                break;
            }
        }
    }

    match found.as_slice() {
        [first, second] => Some(HarnessError::VersionConflict {
            package: first.name.clone(),
            pinned: first.version.clone(),
            conflicting: second.version.clone(),
        }),
        [only] => Some(HarnessError::VersionConflict {
            package: only.name.clone(),
            pinned: only.version.clone(),
            conflicting: "an incompatible requirement".to_owned(),
        }),
        _ => None,
    }
}
