use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use crate::config::{LoggingConfig, LoggingFormat, LoggingOutput};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global tracing subscriber from the `[logging]` config
/// table. A `RUST_LOG` environment filter always wins over the
/// configured level. Returns the guard keeping the non-blocking file
/// writer alive; the caller holds it for the life of the process.
pub fn setup_logging(config: Option<&LoggingConfig>) -> Result<Option<WorkerGuard>> {
    let configured_level = config.map(|c| c.level.as_str()).unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = LevelFilter::from_str(configured_level).unwrap_or(LevelFilter::INFO);
        EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy()
    });

    // Both outputs funnel through one boxed writer, so only the format
    // choice forks below.
    let (writer, guard) = match config.map(|c| &c.output) {
        Some(LoggingOutput::File { path }) => file_writer(path)?,
        _ => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(writer);
    let registry = tracing_subscriber::registry().with(filter);
    match config.map(|c| &c.format) {
        Some(LoggingFormat::Json) => registry.with(fmt_layer.json()).try_init().ok(),
        _ => registry.with(fmt_layer).try_init().ok(),
    };

    Ok(guard)
}

fn file_writer(path: &Path) -> Result<(BoxMakeWriter, Option<WorkerGuard>)> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let filename = path
        .file_name()
        .with_context(|| format!("log file path '{}' has no file name", path.display()))?;
    let appender = tracing_appender::rolling::never(parent, filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    Ok((BoxMakeWriter::new(non_blocking), Some(guard)))
}
