//! Application launch and supervision.
//!
//! Starts the checkout's entry script under the venv interpreter, relays its
//! merged output to the operator, and propagates its exit code. Supervision
//! is deliberately thin: there is no restart policy, and a port collision is
//! the application's error to report — the harness only relays it and adds a
//! remediation hint when the process then dies.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::config::LaunchConfig;
use crate::error::{HarnessError, Result};
use crate::paths::Layout;

/// Environment variable controlling which GPUs the application may see.
pub const GPU_VISIBILITY_ENV: &str = "CUDA_VISIBLE_DEVICES";

/// Sentinel value that hides every GPU.
pub const GPU_HIDDEN_SENTINEL: &str = "-1";

/// Entry scripts tried in order when none is configured.
pub const ENTRY_CANDIDATES: &[&str] = &[
    "app.py",
    "webui.py",
    "main.py",
    "server.py",
    "run.py",
    "gradio_app.py",
    "xtts_app.py",
    "xtts_demo.py",
];

/// Gradio's own readiness line.
const READY_MARKER: &str = "Running on local URL:";

/// Output fragments that indicate the configured port could not be bound.
const BIND_FAILURE_MARKERS: &[&str] = &[
    "cannot find empty port",
    "address already in use",
    "error while attempting to bind",
];

/// How long a SIGTERM'd application gets before SIGKILL.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Resolved launch parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// TCP port handed to the application via `--port`.
    pub port: u16,
    /// Hide all GPUs from the application.
    pub disable_gpu: bool,
    /// Entry script override (None = auto-detect).
    pub entry_script: Option<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            port: 7860,
            disable_gpu: false,
            entry_script: None,
        }
    }
}

impl LaunchOptions {
    /// Options seeded from the persisted launch config.
    #[must_use]
    pub fn from_config(config: &LaunchConfig) -> Self {
        Self {
            port: config.port,
            disable_gpu: config.disable_gpu,
            entry_script: config.entry_script.clone(),
        }
    }
}

/// True when the operator's own environment already hides all GPUs.
///
/// An empty value and the `-1` sentinel both count.
#[must_use]
pub fn host_requests_cpu() -> bool {
    match std::env::var(GPU_VISIBILITY_ENV) {
        Ok(value) => {
            let trimmed = value.trim();
            trimmed.is_empty() || trimmed == GPU_HIDDEN_SENTINEL
        }
        Err(_) => false,
    }
}

/// Merge an explicit CPU request with the operator's environment.
#[must_use]
pub fn resolve_disable_gpu(requested: bool) -> bool {
    requested || host_requests_cpu()
}

/// Find the entry script within a checkout.
///
/// Tries [`ENTRY_CANDIDATES`] in order, then falls back to scanning
/// top-level `.py` files for a Gradio app definition.
#[must_use]
pub fn detect_entry_script(checkout: &Path) -> Option<String> {
    for candidate in ENTRY_CANDIDATES {
        if checkout.join(candidate).is_file() {
            return Some((*candidate).to_owned());
        }
    }

    // No well-known name — look for a file that builds a Gradio app.
    let mut names: Vec<String> = std::fs::read_dir(checkout)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(".py"))
        .collect();
    names.sort();

    for name in names {
        let Ok(content) = std::fs::read_to_string(checkout.join(&name)) else {
            continue;
        };
        if content.contains("gradio") && (content.contains("app =") || content.contains("demo ="))
        {
            return Some(name);
        }
    }
    None
}

/// Check launch preconditions and resolve the entry script.
///
/// # Errors
///
/// [`HarnessError::ProcessStart`] when the model files, the venv
/// interpreter, or any entry script is missing.
pub fn preflight(layout: &Layout, options: &LaunchOptions) -> Result<String> {
    if !layout.model_probe().is_file() {
        return Err(HarnessError::ProcessStart {
            reason: format!(
                "model files missing ({} not found), run setup first",
                layout.model_probe().display()
            ),
        });
    }
    if !layout.venv_python().is_file() {
        return Err(HarnessError::ProcessStart {
            reason: format!(
                "no interpreter at {}, run setup first",
                layout.venv_python().display()
            ),
        });
    }

    match &options.entry_script {
        Some(name) => {
            if layout.checkout_dir().join(name).is_file() {
                Ok(name.clone())
            } else {
                Err(HarnessError::ProcessStart {
                    reason: format!("configured entry script {name} not found in checkout"),
                })
            }
        }
        None => detect_entry_script(&layout.checkout_dir()).ok_or_else(|| {
            HarnessError::ProcessStart {
                reason: format!(
                    "no entry script found in {} (tried {})",
                    layout.checkout_dir().display(),
                    ENTRY_CANDIDATES.join(", ")
                ),
            }
        }),
    }
}

/// Build the application command without spawning it.
///
/// The child always gets unbuffered Python output and disabled Gradio
/// analytics. The GPU-hiding sentinel is set only when `disable_gpu` is
/// true; otherwise the variable is left for the child to inherit.
#[must_use]
pub fn build_command(
    python: &Path,
    checkout: &Path,
    entry: &str,
    options: &LaunchOptions,
) -> Command {
    let mut cmd = Command::new(python);
    cmd.arg(entry)
        .arg("--port")
        .arg(options.port.to_string())
        .current_dir(checkout)
        .env("PYTHONUNBUFFERED", "1")
        .env("GRADIO_ANALYTICS_ENABLED", "False")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if options.disable_gpu {
        cmd.env(GPU_VISIBILITY_ENV, GPU_HIDDEN_SENTINEL);
    }
    cmd
}

/// What one relayed output line means for the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineClass {
    Ready,
    BindFailure,
    Other,
}

fn classify_line(line: &str) -> LineClass {
    if line.contains(READY_MARKER) {
        return LineClass::Ready;
    }
    let lower = line.to_lowercase();
    if BIND_FAILURE_MARKERS.iter().any(|m| lower.contains(m)) {
        return LineClass::BindFailure;
    }
    LineClass::Other
}

/// A spawned application process, killed on drop if still running.
pub struct AppProcess {
    child: Option<Child>,
}

impl AppProcess {
    /// Spawn the prepared command.
    ///
    /// # Errors
    ///
    /// [`HarnessError::ProcessStart`] when the spawn itself fails.
    pub fn spawn(cmd: &mut Command) -> Result<Self> {
        let program = cmd.as_std().get_program().to_string_lossy().into_owned();
        let child = cmd.spawn().map_err(|e| HarnessError::ProcessStart {
            reason: format!("failed to spawn {program}: {e}"),
        })?;
        Ok(Self { child: Some(child) })
    }

    /// The OS process id, while the child is running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Take the child's stdout pipe for relaying.
    pub fn take_stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.as_mut().and_then(|c| c.stdout.take())
    }

    /// Take the child's stderr pipe for relaying.
    pub fn take_stderr(&mut self) -> Option<tokio::process::ChildStderr> {
        self.child.as_mut().and_then(|c| c.stderr.take())
    }

    /// Wait for exit, or stop the application when Ctrl-C arrives.
    ///
    /// Returns the final status and whether the stop was operator-requested.
    /// On Ctrl-C the child gets SIGTERM, [`SHUTDOWN_GRACE`] to comply, then
    /// SIGKILL.
    ///
    /// # Errors
    ///
    /// I/O errors from waiting on the child.
    pub async fn wait_or_shutdown(&mut self) -> Result<(ExitStatus, bool)> {
        let Some(child) = self.child.as_mut() else {
            return Err(HarnessError::ProcessStart {
                reason: "application process already finished".to_owned(),
            });
        };

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = tokio::signal::ctrl_c() => None,
        };

        let result = match waited {
            Some(status) => (status?, false),
            None => {
                tracing::info!("interrupt received, stopping application");
                (shutdown_child(child, SHUTDOWN_GRACE).await?, true)
            }
        };
        self.child = None;
        Ok(result)
    }

    /// Stop the application now: SIGTERM, grace period, then SIGKILL.
    ///
    /// # Errors
    ///
    /// I/O errors from killing or waiting on the child.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<ExitStatus> {
        let Some(child) = self.child.as_mut() else {
            return Err(HarnessError::ProcessStart {
                reason: "application process already finished".to_owned(),
            });
        };
        let status = shutdown_child(child, grace).await?;
        self.child = None;
        Ok(status)
    }
}

impl Drop for AppProcess {
    fn drop(&mut self) {
        if let Some(ref mut child) = self.child {
            // No async in Drop — start_kill sends SIGKILL without waiting.
            let _ = child.start_kill();
            tracing::debug!("killed application process on drop");
        }
    }
}

impl std::fmt::Debug for AppProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppProcess")
            .field("has_child", &self.child.is_some())
            .finish()
    }
}

/// SIGTERM first; SIGKILL only after the grace period.
async fn shutdown_child(child: &mut Child, grace: Duration) -> Result<ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        if let Ok(pid) = i32::try_from(pid) {
            unsafe { libc::kill(pid, libc::SIGTERM) };
        }
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => return Ok(status?),
            Err(_) => {
                tracing::warn!(
                    grace_secs = grace.as_secs(),
                    "application ignored the termination request, killing"
                );
            }
        }
    }

    child.kill().await?;
    Ok(child.wait().await?)
}

/// Relay one output stream line-by-line, flagging bind failures.
async fn relay_lines<R>(reader: R, bind_failure: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        println!("{line}");
        match classify_line(&line) {
            LineClass::Ready => tracing::info!("application is ready"),
            LineClass::BindFailure => bind_failure.store(true, Ordering::Relaxed),
            LineClass::Other => {}
        }
    }
}

/// Launch the application and supervise it to completion.
///
/// Relays merged stdout/stderr to the operator's console and returns the
/// exit code to pass through: the child's own code for a crash or normal
/// exit, `0` for an operator-requested shutdown.
///
/// # Errors
///
/// [`HarnessError::ProcessStart`] for preflight or spawn failures, I/O
/// errors while supervising.
pub async fn launch_app(layout: &Layout, options: &LaunchOptions) -> Result<i32> {
    let entry = preflight(layout, options)?;
    let python = layout.venv_python();
    let checkout = layout.checkout_dir();

    tracing::info!(
        entry = %entry,
        port = options.port,
        disable_gpu = options.disable_gpu,
        "starting application"
    );
    let mut cmd = build_command(&python, &checkout, &entry, options);
    let mut app = AppProcess::spawn(&mut cmd)?;

    let bind_failure = Arc::new(AtomicBool::new(false));
    let mut relays = Vec::with_capacity(2);
    if let Some(stdout) = app.take_stdout() {
        relays.push(tokio::spawn(relay_lines(stdout, Arc::clone(&bind_failure))));
    }
    if let Some(stderr) = app.take_stderr() {
        relays.push(tokio::spawn(relay_lines(stderr, Arc::clone(&bind_failure))));
    }

    let (status, requested) = app.wait_or_shutdown().await?;
    for relay in relays {
        let _ = relay.await;
    }

    let code = if requested {
        0
    } else {
        status.code().unwrap_or(1)
    };

    if code != 0 && bind_failure.load(Ordering::Relaxed) {
        tracing::warn!(
            port = options.port,
            "the application could not bind its port, pick a free one with --port"
        );
    }
    tracing::info!(code, "application exited");
    Ok(code)
}
