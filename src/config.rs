use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{collections::HashMap, net::SocketAddr, path::PathBuf, str::FromStr};
use tokio::fs;
use tracing::debug;
use tracing_subscriber::filter::LevelFilter;

// --- Logging Configuration ---

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoggingFormat {
    #[default]
    Text,
    Json,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoggingOutput {
    #[default]
    Stdout,
    File {
        path: PathBuf,
    },
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LoggingFormat {
    LoggingFormat::Text
}

fn default_log_output() -> LoggingOutput {
    LoggingOutput::Stdout
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LoggingFormat,
    #[serde(default = "default_log_output")]
    pub output: LoggingOutput,
}

// --- Top-Level Configuration ---

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CitronConfig {
    #[serde(default)]
    pub server: HashMap<String, ServerConfig>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

// --- Server Block Configuration ---

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub handler: HandlerConfig,
}

// --- Handler Configuration ---

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum HandlerConfig {
    Static(HandlerStaticConfig),
    // future handler types would go here
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct HandlerStaticConfig {
    /// Directory whose contents are exposed.
    pub root: PathBuf,
    /// Index file names tried, in order, on directory access.
    #[serde(default)]
    pub index_names: Vec<String>,
    /// Synthesize an HTML listing for directories without an index file.
    #[serde(default)]
    pub generate_index_pages: bool,
    /// Transparently gzip responses, caching sidecar files on disk.
    #[serde(default)]
    pub compress: bool,
    /// Advertise and honor `Range: bytes=...` requests.
    #[serde(default)]
    pub accept_byte_range: bool,
    /// Seconds before cached file handles are evicted. Default 10.
    #[serde(default)]
    pub cache_duration_secs: Option<u64>,
    /// Suffix appended to compressed sidecar files. Default ".gz".
    #[serde(default)]
    pub compressed_file_suffix: Option<String>,
}

// --- Loading and Validation ---

/// Loads and parses the configuration from a TOML file, then validates it.
///
/// # Arguments
///
/// * `path` - Path to the citron configuration file.
///
/// # Returns
///
/// Returns `Ok(CitronConfig)` if the file was read, parsed, and validated
/// successfully. Returns `Err` if any step fails.
pub async fn load_and_validate_config(path: &str) -> Result<CitronConfig> {
    let config_content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read configuration file at '{}'", path))?;

    debug!("Read config file content from {}", path);

    let raw_config: CitronConfig = toml::from_str(&config_content)
        .with_context(|| format!("Failed to parse TOML configuration from '{}'", path))?;

    debug!("Parsed TOML configuration successfully.");

    validate_config(&raw_config).context("Configuration validation failed")?;

    debug!("Configuration validation passed.");

    Ok(raw_config)
}

/// Performs validation checks on the parsed CitronConfig.
pub fn validate_config(config: &CitronConfig) -> Result<()> {
    if config.server.is_empty() && config.logging.is_none() {
        bail!("Configuration must define at least one [server] block or a [logging] block.");
    }

    // --- Logging Validation ---
    if let Some(log_config) = &config.logging {
        if LevelFilter::from_str(&log_config.level.to_uppercase()).is_err() {
            bail!(
                "Invalid log level '{}' in [logging] configuration. Use one of: trace, debug, info, warn, error.",
                log_config.level
            );
        }
        if let LoggingOutput::File { path } = &log_config.output {
            if path.as_os_str().is_empty() {
                bail!("Logging output type 'file' requires a non-empty 'path'.");
            }
        }
        debug!("Logging config validated.");
    }

    // --- Server Validation ---
    for (name, server_config) in &config.server {
        debug!(server_name = %name, "Validating server config");

        match &server_config.handler {
            HandlerConfig::Static(static_config) => {
                if static_config.root.as_os_str().is_empty() {
                    bail!(
                        "Server '{}': Handler type 'static' requires a non-empty 'root'.",
                        name
                    );
                }
                if static_config
                    .index_names
                    .iter()
                    .any(|index_name| index_name.is_empty() || index_name.contains('/'))
                {
                    bail!(
                        "Server '{}': 'index_names' entries must be plain file names.",
                        name
                    );
                }
                if static_config.cache_duration_secs == Some(0) {
                    bail!(
                        "Server '{}': 'cache_duration_secs' must be greater than zero.",
                        name
                    );
                }
                if static_config.compressed_file_suffix.as_deref() == Some("") {
                    bail!(
                        "Server '{}': 'compressed_file_suffix' must be non-empty when set.",
                        name
                    );
                }
                debug!(server_name = %name, "Static handler config validated.");
            }
        }
    }

    Ok(())
}
