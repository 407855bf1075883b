//! Sharegate Daemon
//!
//! Capability-scoped file sharing over HTTP.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::{default_config_path, Config};
use daemon::AppState;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Sharegate - capability-scoped file sharing over HTTP.
#[derive(Parser, Debug)]
#[command(name = "sharegate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the HTTP server
    Serve,

    /// Issue a capability token and print it
    Issue {
        /// Scope string, e.g. "r--" or "rwd"
        #[arg(long, short)]
        mode: String,

        /// Directory relative to the public root
        #[arg(long, short, default_value = "")]
        dir: String,

        /// Lifetime in minutes (default: auth.default_valid_minutes)
        #[arg(long)]
        valid: Option<i64>,
    },

    /// Validate the configuration and print it
    CheckConfig,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    if let Commands::Init { force } = cli.command {
        return init_config(&config_path, force);
    }

    // Load configuration
    let mut config = Config::load(&config_path)?;

    // Initialize tracing before the overrides so they are logged
    let _guard = init_tracing(&config, cli.verbose)?;
    tracing::debug!("Using config file: {:?}", config_path);

    // Apply environment variable overrides
    config.apply_env_overrides();

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    match cli.command {
        Commands::Serve => {
            config.ensure_directories()?;
            tracing::info!("Sharegate starting...");
            let state = AppState::new(config)?;

            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                wait_for_shutdown_signal().await;
                tracing::info!("Received shutdown signal");
                trigger.cancel();
            });

            daemon::serve(state, shutdown).await?;
        }
        Commands::Issue { mode, dir, valid } => {
            config.ensure_directories()?;
            let valid = valid.unwrap_or(config.auth.default_valid_minutes);
            let state = AppState::new(config)?;
            let token = state
                .codec
                .issue(&mode, &dir, valid)
                .context("Failed to issue token")?;
            println!("{token}");
        }
        Commands::CheckConfig => {
            println!("Configuration OK ({})", config_path.display());
            println!("{:#?}", config);
        }
        // Handled before loading configuration.
        Commands::Init { .. } => {}
    }

    Ok(())
}

/// Write the default configuration to `path`.
fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Install the global subscriber.
///
/// Logs go to stderr, and additionally to a daily rolling file when
/// `logging.directory` is set. The returned guard must be held until exit.
fn init_tracing(config: &Config, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.effective_log_level()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match &config.logging.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "sharegate.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!("Failed to register signal handlers: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
}
