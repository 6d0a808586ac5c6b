//! Doctor checks for the provisioned environment.
//!
//! Doctor inspects the interpreter, the checkout, the downloaded assets,
//! and the compatibility shim, and reports findings with remediation
//! hints. It never repairs anything itself; the remedy for almost every
//! problem is re-running setup.

use std::path::Path;

use crate::checkout::{self, CheckoutState};
use crate::config::HarnessConfig;
use crate::launcher;
use crate::paths::Layout;
use crate::python::{MINIMUM_PYTHON_VERSION, PythonBootstrap};
use crate::setup::available_disk_space;
use crate::shim::{self, SymbolProbe};

/// Free space below which a low-disk finding is emitted (1 GiB).
const LOW_DISK_FLOOR: u64 = 1024 * 1024 * 1024;

/// Severity level for a doctor finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoctorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A single doctor finding.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DoctorFinding {
    pub id: String,
    pub title: String,
    pub severity: DoctorSeverity,
    pub summary: String,
    pub evidence: Vec<String>,
    pub remedies: Vec<String>,
}

impl DoctorFinding {
    fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        severity: DoctorSeverity,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            severity,
            summary: summary.into(),
            evidence: Vec::new(),
            remedies: Vec::new(),
        }
    }

    fn with_evidence(mut self, line: impl Into<String>) -> Self {
        self.evidence.push(line.into());
        self
    }

    fn with_remedy(mut self, command: impl Into<String>) -> Self {
        self.remedies.push(command.into());
        self
    }
}

/// Runs all checks and returns findings. Problems only; a healthy
/// environment yields a single info card.
pub fn run_checks(layout: &Layout, config_path: Option<&Path>) -> Vec<DoctorFinding> {
    let mut findings = Vec::new();

    findings.extend(config_finding(config_path));
    findings.extend(interpreter_finding());
    findings.extend(git_finding());
    findings.extend(venv_finding(layout));
    findings.extend(checkout_findings(layout));
    findings.extend(asset_findings(layout));
    findings.extend(shim_finding(layout));
    findings.extend(disk_finding(layout));

    finalize(findings)
}

/// Append the healthy card when no check produced a finding.
fn finalize(mut findings: Vec<DoctorFinding>) -> Vec<DoctorFinding> {
    if findings.is_empty() {
        findings.push(DoctorFinding::new(
            "environment-healthy",
            "No issues found",
            DoctorSeverity::Info,
            "Interpreter, checkout, assets, and shim all look ready to launch.",
        ));
    }
    findings
}

/// True when any finding blocks normal operation.
#[must_use]
pub fn has_failures(findings: &[DoctorFinding]) -> bool {
    findings
        .iter()
        .any(|f| matches!(f.severity, DoctorSeverity::Error | DoctorSeverity::Critical))
}

/// Render findings as an operator-facing text report.
#[must_use]
pub fn render_text(findings: &[DoctorFinding]) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    for finding in findings {
        let tag = match finding.severity {
            DoctorSeverity::Info => " ok ",
            DoctorSeverity::Warning => "warn",
            DoctorSeverity::Error | DoctorSeverity::Critical => "FAIL",
        };
        let _ = writeln!(out, "[{tag}] {}", finding.title);
        let _ = writeln!(out, "       {}", finding.summary);
        for line in &finding.evidence {
            let _ = writeln!(out, "       {line}");
        }
        for remedy in &finding.remedies {
            let _ = writeln!(out, "       try: {remedy}");
        }
    }
    out
}

// ── Individual checks ───────────────────────────────────────────────────────

fn config_finding(config_path: Option<&Path>) -> Option<DoctorFinding> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => crate::paths::config_file(),
    };
    if !path.exists() {
        // Defaults apply, nothing to report.
        return None;
    }
    match HarnessConfig::from_file(&path) {
        Ok(_) => None,
        Err(e) => Some(
            DoctorFinding::new(
                "config-unreadable",
                "Config file unreadable",
                DoctorSeverity::Critical,
                format!("{} exists but cannot be parsed.", path.display()),
            )
            .with_evidence(e.to_string())
            .with_remedy("fix or delete the file and rerun"),
        ),
    }
}

fn interpreter_finding() -> Option<DoctorFinding> {
    match PythonBootstrap::discover(None) {
        Ok(_) => None,
        Err(e) => Some(
            DoctorFinding::new(
                "python-missing",
                "No usable Python interpreter",
                DoctorSeverity::Error,
                format!("Setup needs Python {MINIMUM_PYTHON_VERSION} or newer."),
            )
            .with_evidence(e.to_string())
            .with_remedy("install python3 from your package manager"),
        ),
    }
}

fn git_finding() -> Option<DoctorFinding> {
    if checkout::discover_git(None).is_some() {
        return None;
    }
    Some(
        DoctorFinding::new(
            "git-missing",
            "git not found",
            DoctorSeverity::Warning,
            "Setup cannot fetch or update the web UI source without git.",
        )
        .with_remedy("install git from your package manager"),
    )
}

fn venv_finding(layout: &Layout) -> Option<DoctorFinding> {
    let python = layout.venv_python();
    if python.is_file() {
        return None;
    }
    Some(
        DoctorFinding::new(
            "venv-missing",
            "Virtual environment missing",
            DoctorSeverity::Error,
            format!("No interpreter at {}.", python.display()),
        )
        .with_remedy("xtts-local setup"),
    )
}

fn checkout_findings(layout: &Layout) -> Vec<DoctorFinding> {
    let dir = layout.checkout_dir();
    match checkout::probe(&dir) {
        CheckoutState::Missing => vec![
            DoctorFinding::new(
                "checkout-missing",
                "Web UI source missing",
                DoctorSeverity::Error,
                format!("No checkout at {}.", dir.display()),
            )
            .with_remedy("xtts-local setup"),
        ],
        CheckoutState::Foreign => vec![
            DoctorFinding::new(
                "checkout-foreign",
                "Checkout directory occupied",
                DoctorSeverity::Error,
                format!("{} exists but is not a git checkout.", dir.display()),
            )
            .with_remedy("move the directory aside and rerun setup"),
        ],
        CheckoutState::Valid => entry_finding(&dir).into_iter().collect(),
    }
}

fn entry_finding(checkout_dir: &Path) -> Option<DoctorFinding> {
    match launcher::detect_entry_script(checkout_dir) {
        Some(entry) if launcher::ENTRY_CANDIDATES.contains(&entry.as_str()) => None,
        Some(entry) => Some(DoctorFinding::new(
            "entry-scanned",
            "Entry script resolved by content scan",
            DoctorSeverity::Info,
            format!("No well-known entry name; {entry} looks like the Gradio app."),
        )),
        None => Some(
            DoctorFinding::new(
                "entry-missing",
                "No entry script in the checkout",
                DoctorSeverity::Error,
                "Launch cannot pick a script to run.",
            )
            .with_evidence(format!("tried {}", launcher::ENTRY_CANDIDATES.join(", ")))
            .with_remedy("set launch.entry_script in the config or pass --entry"),
        ),
    }
}

fn asset_findings(layout: &Layout) -> Vec<DoctorFinding> {
    let mut findings = Vec::new();

    if !layout.model_probe().is_file() {
        findings.push(
            DoctorFinding::new(
                "model-missing",
                "Model files missing",
                DoctorSeverity::Error,
                format!("{} not found.", layout.model_probe().display()),
            )
            .with_remedy("xtts-local setup"),
        );
    }

    if !crate::assets::dir_is_populated(&layout.voices_dir()) {
        findings.push(
            DoctorFinding::new(
                "voices-missing",
                "Voice samples missing",
                DoctorSeverity::Warning,
                format!("{} is empty.", layout.voices_dir().display()),
            )
            .with_remedy("xtts-local setup"),
        );
    }

    findings
}

fn shim_finding(layout: &Layout) -> Option<DoctorFinding> {
    let python = layout.venv_python();
    if !python.is_file() {
        // The venv finding already covers this.
        return None;
    }
    match shim::probe_symbol(&python) {
        SymbolProbe::Present => None,
        SymbolProbe::Absent => {
            let current = std::fs::read_to_string(layout.shim_file())
                .map(|content| content == shim::SHIM_SOURCE)
                .unwrap_or(false);
            if current {
                None
            } else {
                Some(
                    DoctorFinding::new(
                        "shim-stale",
                        "Compatibility shim missing or stale",
                        DoctorSeverity::Warning,
                        "transformers lacks LogitsWarper and the shim file is not in place.",
                    )
                    .with_remedy("xtts-local setup"),
                )
            }
        }
        SymbolProbe::Unknown => Some(
            DoctorFinding::new(
                "shim-unprobeable",
                "Cannot probe transformers",
                DoctorSeverity::Warning,
                "The venv interpreter could not import transformers.",
            )
            .with_remedy("xtts-local setup"),
        ),
    }
}

fn disk_finding(layout: &Layout) -> Option<DoctorFinding> {
    let base = layout.base_dir();
    if !base.exists() {
        return None;
    }
    match available_disk_space(&base) {
        Ok(free) if free < LOW_DISK_FLOOR => Some(
            DoctorFinding::new(
                "disk-low",
                "Low disk space",
                DoctorSeverity::Warning,
                format!("{} MB free under {}.", free / 1_000_000, base.display()),
            )
            .with_remedy("free up space before generating audio"),
        ),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("disk space check failed: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn ids(findings: &[DoctorFinding]) -> Vec<&str> {
        findings.iter().map(|f| f.id.as_str()).collect()
    }

    #[test]
    fn builder_accumulates_evidence_and_remedies() {
        let finding = DoctorFinding::new("x", "X", DoctorSeverity::Warning, "s")
            .with_evidence("line one")
            .with_evidence("line two")
            .with_remedy("xtts-local setup");
        assert_eq!(finding.evidence.len(), 2);
        assert_eq!(finding.remedies, vec!["xtts-local setup"]);
    }

    #[test]
    fn empty_layout_flags_the_essentials() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = Layout::new(tmp.path());

        let findings: Vec<_> = venv_finding(&layout)
            .into_iter()
            .chain(checkout_findings(&layout))
            .chain(asset_findings(&layout))
            .collect();

        let found = ids(&findings);
        assert!(found.contains(&"venv-missing"));
        assert!(found.contains(&"checkout-missing"));
        assert!(found.contains(&"model-missing"));
        assert!(found.contains(&"voices-missing"));
    }

    #[test]
    fn occupied_checkout_dir_is_foreign() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = Layout::new(tmp.path());
        std::fs::create_dir_all(layout.checkout_dir()).expect("mkdir");
        std::fs::write(layout.checkout_dir().join("stray.txt"), "x").expect("write");

        let findings = checkout_findings(&layout);
        assert_eq!(ids(&findings), vec!["checkout-foreign"]);
        assert!(has_failures(&findings));
    }

    #[test]
    fn valid_checkout_with_candidate_entry_is_quiet() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = Layout::new(tmp.path());
        std::fs::create_dir_all(layout.checkout_dir().join(".git")).expect("mkdir");
        std::fs::write(layout.checkout_dir().join("app.py"), "import gradio").expect("write");

        assert!(checkout_findings(&layout).is_empty());
    }

    #[test]
    fn scanned_entry_yields_info_card() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = Layout::new(tmp.path());
        std::fs::create_dir_all(layout.checkout_dir().join(".git")).expect("mkdir");
        std::fs::write(
            layout.checkout_dir().join("voice_ui.py"),
            "import gradio as gr\napp = gr.Blocks()\n",
        )
        .expect("write");

        let findings = checkout_findings(&layout);
        assert_eq!(ids(&findings), vec!["entry-scanned"]);
        assert!(!has_failures(&findings));
    }

    #[test]
    fn entry_missing_in_valid_checkout_is_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = Layout::new(tmp.path());
        std::fs::create_dir_all(layout.checkout_dir().join(".git")).expect("mkdir");

        let findings = checkout_findings(&layout);
        assert_eq!(ids(&findings), vec!["entry-missing"]);
        assert!(has_failures(&findings));
    }

    #[test]
    fn provisioned_layout_passes_the_layout_checks() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = Layout::new(tmp.path());
        std::fs::create_dir_all(layout.checkout_dir().join(".git")).expect("mkdir");
        std::fs::write(layout.checkout_dir().join("app.py"), "import gradio").expect("write");
        std::fs::create_dir_all(layout.model_dir()).expect("mkdir");
        std::fs::write(layout.model_probe(), "{}").expect("write");
        std::fs::create_dir_all(layout.voices_dir()).expect("mkdir");
        std::fs::write(layout.voices_dir().join("calm_female.wav"), "RIFF").expect("write");
        let python = layout.venv_python();
        std::fs::create_dir_all(python.parent().expect("parent")).expect("mkdir");
        std::fs::write(&python, "").expect("write");

        let findings: Vec<_> = venv_finding(&layout)
            .into_iter()
            .chain(checkout_findings(&layout))
            .chain(asset_findings(&layout))
            .collect();
        assert!(findings.is_empty(), "got: {:?}", ids(&findings));
    }

    #[test]
    fn missing_config_file_is_quiet() {
        let tmp = tempfile::tempdir().expect("tempdir");
        assert!(config_finding(Some(&tmp.path().join("absent.toml"))).is_none());
    }

    #[test]
    fn corrupt_config_file_is_critical() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "launch = not toml").expect("write");

        let finding = config_finding(Some(&path)).expect("finding");
        assert_eq!(finding.id, "config-unreadable");
        assert!(matches!(finding.severity, DoctorSeverity::Critical));
        assert!(has_failures(&[finding]));
    }

    #[test]
    fn clean_run_yields_healthy_card() {
        let findings = finalize(Vec::new());
        assert_eq!(ids(&findings), vec!["environment-healthy"]);
        assert!(!has_failures(&findings));
    }

    #[test]
    fn render_includes_titles_and_remedies() {
        let findings = vec![
            DoctorFinding::new(
                "model-missing",
                "Model files missing",
                DoctorSeverity::Error,
                "config.json not found.",
            )
            .with_remedy("xtts-local setup"),
        ];
        let text = render_text(&findings);
        assert!(text.contains("[FAIL] Model files missing"));
        assert!(text.contains("try: xtts-local setup"));
    }

    #[test]
    fn severity_serializes_snake_case() {
        let value = serde_json::to_value(DoctorSeverity::Warning).expect("serialize");
        assert_eq!(value, serde_json::json!("warning"));
    }
}
