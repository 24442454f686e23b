//! fleetguard - Entry Point
//!
//! Deploys a local git HEAD to remote environments over SSH, validates the
//! result over HTTP and recovers from stuck or failing operations.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fleetguard::app::options::{AppOptions, Command};
use fleetguard::app::run::run;
use fleetguard::app::state::AppState;
use fleetguard::logs::{init_logging, LogLevel, LogOptions};
use fleetguard::models::deployment::DeployOptions;
use fleetguard::storage::layout::StorageLayout;
use fleetguard::storage::settings::Settings;
use fleetguard::utils::version_info;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

#[derive(Parser)]
#[command(
    name = "fleetguard",
    about = "Deployment sync, health validation and deadlock recovery for remote environments",
    version = VERSION,
    propagate_version = true
)]
struct Cli {
    /// Configuration directory (environments.json, settings.json, audit.log)
    #[arg(long, global = true, env = "FLEETGUARD_HOME")]
    base_dir: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy the local HEAD to an environment
    Deploy {
        /// Environment name from environments.json
        environment: String,

        /// Free-text reason recorded in the run and the audit log
        #[arg(long)]
        reason: Option<String>,

        /// Fetch and reset even if the remote is already at the target commit
        #[arg(long)]
        force_sync: bool,

        /// Remove cache directories before starting
        #[arg(long)]
        no_cache: bool,

        /// Roll back to the previous commit if a phase fails
        #[arg(long)]
        auto_rollback: bool,
    },

    /// Guarded operations outside a deployment
    Guardian {
        #[command(subcommand)]
        subcommand: GuardianSubcommand,
    },

    /// Probe an environment's endpoints (exit 1 when unhealthy)
    HealthCheck {
        /// Environment name
        target: String,
    },
}

#[derive(Subcommand)]
enum GuardianSubcommand {
    /// Restart the application process
    Start {
        /// Environment name
        target: String,
    },

    /// Check SSH connectivity
    Test {
        /// Environment name
        target: String,
    },
}

impl From<Commands> for Command {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Deploy {
                environment,
                reason,
                force_sync,
                no_cache,
                auto_rollback,
            } => Command::Deploy {
                environment,
                options: DeployOptions {
                    reason,
                    force_sync,
                    no_cache,
                    auto_rollback,
                },
            },
            Commands::Guardian { subcommand } => match subcommand {
                GuardianSubcommand::Start { target } => Command::GuardianStart { target },
                GuardianSubcommand::Test { target } => Command::GuardianTest { target },
            },
            Commands::HealthCheck { target } => Command::HealthCheck { target },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let layout = cli.base_dir.map(StorageLayout::new).unwrap_or_default();

    // Retrieve the settings file; missing means defaults
    let mut settings = match layout.settings_file().read_json_or_default::<Settings>().await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} unable to read settings file: {}", "Error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }
    if cli.json_logs {
        settings.log_json = true;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.log_json,
        log_dir: settings.log_to_file.then(|| layout.logs_dir()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    if let Err(e) = settings.validate() {
        error!("{}", e);
        eprintln!("{} {}", "Error:".red().bold(), e);
        return ExitCode::FAILURE;
    }

    let version = version_info();
    info!("fleetguard {}", version);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            await_shutdown_signal().await;
            cancel.cancel();
        }
    });

    let options = AppOptions {
        layout,
        ..Default::default()
    };
    let state = match AppState::init(&options, settings, cancel).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize: {}", e);
            eprintln!("{} {}", "Error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    match run(&state, cli.command.into()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    warn!("Unable to install signal handlers, falling back to Ctrl+C");
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Ctrl+C received, cancelling...");
                    }
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, cancelling...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, cancelling...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Ctrl+C received, cancelling...");
    }
}
