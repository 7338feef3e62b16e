use crate::config;
use crate::config::CitronConfig;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "🍋 Citron: a static file web server")]
pub struct Cli {
    /// Path to the citron configuration file.
    #[arg(
        short,
        long,
        value_name = "FILE",
        global = true, // allows specifying --config before or after subcommand
        default_value = "citron.toml"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run Citron (default command)
    Run,

    /// Validate the configuration file and exit.
    Validate,

    /// Create a basic citron.toml config file in the current directory.
    #[command(name = "create-config")]
    CreateConfig {
        /// Overwrite existing citron.toml file if present.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    // NOTE: 'help' and 'version' subcommands/flags are automatically handled by clap
    // based on the attributes on the `Cli` struct and Cargo.toml.
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

// --- Command Implementations ---

pub(crate) async fn validate_config_cmd(
    config_path: &Path,
    config: Option<CitronConfig>,
) -> Result<()> {
    if config.is_none() {
        if !config_path.exists() {
            bail!("Configuration file not found: {}", config_path.display());
        }
        let config_path_str = config_path.to_str().ok_or_else(|| {
            anyhow::anyhow!(
                "Configuration path is not valid UTF-8: {}",
                config_path.display()
            )
        })?;

        config::load_and_validate_config(config_path_str)
            .await
            .with_context(|| format!("Validation failed for '{}'", config_path.display()))?;
    } else {
        debug!("Using pre-validated configuration for validation check.");
    }

    info!(
        "✅ Configuration file '{}' is valid.",
        config_path.display()
    );
    Ok(())
}

pub(crate) async fn create_default_config_cmd(config_path: &Path, force: bool) -> Result<PathBuf> {
    if config_path.exists() && !force {
        bail!(
            "Configuration file '{}' already exists. Use --force to overwrite.",
            config_path.display()
        );
    }

    let default_content = r#"# Default Citron Configuration
# Define at least one server instance below.

# Serves files from the './public' directory on port 8080.
[server.my_site]
listen_addr = "127.0.0.1:8080" # Use 0.0.0.0:8080 to listen on all interfaces

[server.my_site.handler]
type = "static"
root = "./public" # Path relative to where 'citron' runs
index_names = ["index.html"]
# generate_index_pages = true  # Render a listing for directories without an index file
# compress = true              # Cache gzip sidecars next to the originals (needs write access)
# accept_byte_range = true     # Honor 'Range: bytes=...' requests
# cache_duration_secs = 10     # How long idle file handles stay cached
# compressed_file_suffix = ".gz"

# Optional logging configuration:
# [logging]
# level = "info"               # trace, debug, info, warn, error
# format = "text"              # text or json
# output = { type = "stdout" } # or { type = "file", path = "./citron.log" }
"#;

    fs::write(config_path, default_content)
        .await
        .with_context(|| {
            format!(
                "Failed to write default config file to '{}'",
                config_path.display()
            )
        })?;

    info!(
        "✅ Created default configuration file at '{}'.",
        config_path.display()
    );
    Ok(config_path.to_path_buf())
}
