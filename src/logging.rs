//! Logging setup for the flowmux binary

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive for the verbosity flags
///
/// `RUST_LOG` takes precedence when set.
pub fn filter_directive(debug: bool, quiet: bool) -> &'static str {
    if debug {
        "flowmux=debug"
    } else if quiet {
        "flowmux=error"
    } else {
        "flowmux=info"
    }
}

/// Initialize logging based on output mode and debug flag
///
/// Logs go to stderr; with `log_file` they are also appended to that file
/// through a background writer. Keep the returned guard alive until exit so
/// buffered lines are flushed.
pub fn init_logging(
    debug: bool,
    quiet: bool,
    log_file: Option<PathBuf>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(debug, quiet)));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(debug)
        .with_file(debug)
        .with_writer(std::io::stderr);

    let Some(log_path) = log_file else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
        return Ok(None);
    };

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_target(true)
        .with_line_number(true)
        .with_file(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(file_layer)
        .init();

    Ok(Some(guard))
}

/// Get default log file path for a graph run
pub fn default_log_path(graph: &str) -> anyhow::Result<PathBuf> {
    let log_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join("flowmux")
        .join("logs");

    Ok(log_path_in(&log_dir, graph))
}

fn log_path_in(dir: &Path, graph: &str) -> PathBuf {
    let stem: String = graph
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    dir.join(format!("{}-{}.log", stem, timestamp))
}
