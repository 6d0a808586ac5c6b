//! CLI binary for xtts-local.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use xtts_local::launcher::{self, LaunchOptions};
use xtts_local::{HarnessConfig, Layout, Manifest, SetupOptions};

/// Deploy and launch the XTTS text-to-speech web UI.
#[derive(Parser)]
#[command(name = "xtts-local", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Provision everything: venv, pinned packages, source, and models.
    Setup {
        /// Skip the model and voice archive downloads.
        #[arg(long)]
        skip_download: bool,

        /// Install into the discovered interpreter instead of a venv.
        #[arg(long)]
        system_python: bool,

        /// Interpreter to try before the usual discovery candidates.
        #[arg(long)]
        python: Option<PathBuf>,

        /// git executable to try before the usual discovery candidates.
        #[arg(long)]
        git: Option<PathBuf>,

        /// Working directory override.
        #[arg(long)]
        base_dir: Option<PathBuf>,
    },

    /// Launch the web UI.
    Run {
        /// TCP port for the web UI.
        #[arg(short, long)]
        port: Option<u16>,

        /// Hide all GPUs from the application.
        #[arg(long)]
        cpu: bool,

        /// Entry script override.
        #[arg(long)]
        entry: Option<String>,

        /// Working directory override.
        #[arg(long)]
        base_dir: Option<PathBuf>,
    },

    /// Check the provisioned environment and report problems.
    Doctor {
        /// Emit findings as JSON.
        #[arg(long)]
        json: bool,

        /// Working directory override.
        #[arg(long)]
        base_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run {
        port: None,
        cpu: false,
        entry: None,
        base_dir: None,
    });

    // Setup and run also log to a file under the working tree; doctor only
    // writes to stderr.
    let log_dir = match &command {
        Command::Setup { base_dir, .. } | Command::Run { base_dir, .. } => {
            Some(Layout::resolve(base_dir.as_deref()).logs_dir())
        }
        Command::Doctor { .. } => None,
    };
    let _log_guard = init_tracing(log_dir.as_deref());

    match command {
        Command::Setup {
            skip_download,
            system_python,
            python,
            git,
            base_dir,
        } => setup_command(
            cli.config.as_deref(),
            SetupOptions {
                skip_download,
                system_python,
                python,
                git,
            },
            base_dir,
        ),
        Command::Run {
            port,
            cpu,
            entry,
            base_dir,
        } => run_command(cli.config.as_deref(), port, cpu, entry, base_dir).await,
        Command::Doctor { json, base_dir } => {
            doctor_command(cli.config.as_deref(), json, base_dir)
        }
    }
}

/// Initialize tracing — suppress noisy dependency logs by default.
/// Users can override with RUST_LOG=debug to see everything.
fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("xtts_local=info,ureq=warn"));

    if let Some(dir) = log_dir
        && std::fs::create_dir_all(dir).is_ok()
    {
        let appender = tracing_appender::rolling::never(dir, "xtts-local.log");
        let (file_writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false),
            )
            .init();
        return Some(guard);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    None
}

fn setup_command(
    config_path: Option<&Path>,
    options: SetupOptions,
    base_dir: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    println!("xtts-local v{}", env!("CARGO_PKG_VERSION"));

    let config = HarnessConfig::load(config_path)?;
    let layout = Layout::resolve(base_dir.as_deref());
    let manifest = Manifest::pinned();

    xtts_local::setup::run_setup(&config, &layout, &manifest, &options)?;
    Ok(ExitCode::SUCCESS)
}

async fn run_command(
    config_path: Option<&Path>,
    port: Option<u16>,
    cpu: bool,
    entry: Option<String>,
    base_dir: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    println!("xtts-local v{}", env!("CARGO_PKG_VERSION"));

    let config = HarnessConfig::load(config_path)?;
    let layout = Layout::resolve(base_dir.as_deref());

    let mut options = LaunchOptions::from_config(&config.launch);
    if let Some(port) = port {
        options.port = port;
    }
    if let Some(entry) = entry {
        options.entry_script = Some(entry);
    }
    options.disable_gpu = launcher::resolve_disable_gpu(options.disable_gpu || cpu);
    if options.disable_gpu {
        tracing::info!("GPUs hidden, the application will run on CPU");
    }

    let code = launcher::launch_app(&layout, &options).await?;
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

fn doctor_command(
    config_path: Option<&Path>,
    json: bool,
    base_dir: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    let layout = Layout::resolve(base_dir.as_deref());
    let findings = xtts_local::doctor::run_checks(&layout, config_path);

    if json {
        println!("{}", serde_json::to_string_pretty(&findings)?);
    } else {
        print!("{}", xtts_local::doctor::render_text(&findings));
    }

    Ok(if xtts_local::doctor::has_failures(&findings) {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}
