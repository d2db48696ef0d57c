use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Archived logs of earlier runs kept next to the current one.
const KEPT_ARCHIVES: usize = 10;

/// Logs to `<log_dir>/<service_name>.log` and the console. The previous
/// run's file is archived first.
pub fn init_logging(log_dir: &str, service_name: &str, debug: bool) -> Result<()> {
    let dir = Path::new(log_dir);
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {log_dir}"))?;
    let archived = rotate_logs_on_startup(dir, service_name)?;

    let file_appender = rolling::never(dir, format!("{service_name}.log"));
    let (non_blocking_file, file_guard) = non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = non_blocking(std::io::stdout());

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_writer(non_blocking_stdout)
        .with_ansi(true)
        .with_target(debug)
        .with_thread_ids(false)
        .with_line_number(false);

    // RUST_LOG wins over --debug
    let default_level = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    // Writer threads must outlive main
    std::mem::forget(file_guard);
    std::mem::forget(stdout_guard);

    if let Some(path) = archived {
        info!("Previous log file archived to: {}", path.display());
    }
    info!("Logging initialized - logs will be written to {log_dir}/{service_name}.log");

    Ok(())
}

/// Renames the previous run's log to `<service_name>.<timestamp>.log` and
/// prunes archives beyond the newest [`KEPT_ARCHIVES`].
pub fn rotate_logs_on_startup(log_dir: &Path, service_name: &str) -> Result<Option<PathBuf>> {
    let current = log_dir.join(format!("{service_name}.log"));

    let archived = if current.exists() {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let target = log_dir.join(format!("{service_name}.{timestamp}.log"));
        std::fs::rename(&current, &target)
            .with_context(|| format!("Failed to archive {}", current.display()))?;
        Some(target)
    } else {
        None
    };

    prune_archives(log_dir, service_name, KEPT_ARCHIVES)?;
    Ok(archived)
}

fn prune_archives(log_dir: &Path, service_name: &str, keep: usize) -> Result<()> {
    let current = format!("{service_name}.log");
    let prefix = format!("{service_name}.");

    let mut archives: Vec<PathBuf> = std::fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name != current && name.starts_with(&prefix) && name.ends_with(".log"))
                .unwrap_or(false)
        })
        .collect();

    // Timestamps sort lexicographically, oldest first.
    archives.sort();
    let excess = archives.len().saturating_sub(keep);
    for old in archives.into_iter().take(excess) {
        std::fs::remove_file(&old)
            .with_context(|| format!("Failed to prune old log {}", old.display()))?;
    }

    Ok(())
}
