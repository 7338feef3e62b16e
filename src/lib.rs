pub mod cli;
pub mod common;
pub mod config;
pub mod connection;
pub mod handlers;
pub mod logging;
pub mod server;
pub mod shutdown;

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::CitronConfig;
use crate::server::{prepare_listeners, spawn_accept_loops};

/// Binds every configured listener and spawns its accept loop, but does
/// not wait for shutdown. Useful for embedding and for tests.
pub async fn start_services(
    config: &CitronConfig,
    shutdown_rx: watch::Receiver<()>,
) -> Result<Vec<JoinHandle<Result<()>>>> {
    let listener_contexts = prepare_listeners(config, shutdown_rx).await?;
    Ok(spawn_accept_loops(listener_contexts))
}

/// The main entry point for running the Citron server logic.
pub async fn run(config_path: &Path, config: CitronConfig) -> Result<()> {
    // --- Core Setup (Shutdown Signal Only) ---
    let (shutdown_tx, shutdown_rx, ctrl_c_signal) = shutdown::setup_shutdown_signal();

    // --- Start Services ---
    let server_handles = start_services(&config, shutdown_rx.clone())
        .await
        .context("Service initialization failed")?;

    info!("Accept loops launched. Ready to accept connections.");

    // --- Wait for Shutdown ---
    let shutdown_timeout = Duration::from_secs(30);
    shutdown::await_shutdown(shutdown_tx, ctrl_c_signal, server_handles, shutdown_timeout).await;

    info!(
        "citron server using {} has shut down gracefully.",
        config_path.display()
    );
    Ok(())
}

/// CLI dispatch: loads configuration where the command needs one, sets up
/// logging, and runs the selected command.
pub async fn press(cli_args: cli::Cli) -> Result<()> {
    // --- Determine command and config path early ---
    let command_to_run = cli_args.command.unwrap_or(cli::Commands::Run);
    let config_path = Path::new(&cli_args.config);

    // --- Load config only if needed (Validate/Run) ---
    // Note: create-config doesn't need to load an existing config
    let config: Option<CitronConfig> =
        if matches!(command_to_run, cli::Commands::Run | cli::Commands::Validate) {
            if config_path.exists() {
                let loaded = config::load_and_validate_config(
                    config_path
                        .to_str()
                        .context("Configuration path is not valid UTF-8")?,
                )
                .await;
                match loaded {
                    Ok(cfg) => Some(cfg),
                    Err(e) => {
                        return Err(e.context(format!(
                            "Config load/validation failed for '{}'",
                            config_path.display()
                        )));
                    }
                }
            } else if matches!(command_to_run, cli::Commands::Run) {
                // If running and config doesn't exist, it's an error.
                bail!("Configuration file not found: {}", config_path.display());
            } else {
                // Validate command and config doesn't exist
                // Let validate_config_cmd handle non-existent file message
                None
            }
        } else {
            None // Not Run or Validate command
        };

    // --- Setup logging ---
    // Pass loaded config if available, otherwise defaults will be used
    let _logging_guard = logging::setup_logging(config.as_ref().and_then(|c| c.logging.as_ref()))?;
    // Keep the guard in scope until press finishes

    // Dispatch based on the command
    match command_to_run {
        cli::Commands::Run => {
            // We already attempted to load and validate the config above.
            // If we are here, 'config' must contain Some(validated_config).
            let loaded_config = config.expect("Config should be loaded for Run command");
            info!("🍋 Starting Citron using config: {}", config_path.display());
            run(config_path, loaded_config).await?;
            info!("🍋 Citron shut down gracefully.");
        }
        cli::Commands::Validate => {
            info!("Validating configuration file: {}", config_path.display());
            // Pass the already loaded config (if any) to avoid reloading
            cli::validate_config_cmd(config_path, config).await?;
        }
        cli::Commands::CreateConfig { force } => {
            info!(
                "Attempting to create default config file: {}",
                config_path.display()
            );
            cli::create_default_config_cmd(config_path, force).await?;
        }
    }
    Ok(())
}
