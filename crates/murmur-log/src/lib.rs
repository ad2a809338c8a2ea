// ABOUTME: Shared logging setup for murmur binaries
// ABOUTME: init() for stderr, init_file() for servers that own stdout, log_path() to locate the file

use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::EnvFilter;

fn filter(default: Level) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(default.into())
}

/// Directory holding murmur log files: `$XDG_CONFIG_HOME/murmur`, else the
/// platform config dir.
pub fn log_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .map(|dir| dir.join("murmur"))
}

/// Log file used by `init_file(app_name)`.
pub fn log_path(app_name: &str) -> Option<PathBuf> {
    log_dir().map(|dir| dir.join(format!("{app_name}.log")))
}

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
///
/// Always stderr: `murmur serve` speaks its protocol on stdout.
pub fn init() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter(Level::INFO))
        .init();
}

/// File-based logging. Default: WARN level, RUST_LOG override.
/// If setup fails, prints a warning to stderr and continues without logging.
pub fn init_file(app_name: &str) {
    if let Err(e) = init_file_inner(app_name) {
        eprintln!("Warning: failed to set up file logging: {e}");
    }
}

fn init_file_inner(app_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = log_path(app_name).ok_or("could not determine config directory")?;
    init_file_at(&path)
}

fn init_file_at(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(filter(Level::WARN))
        .with_ansi(false)
        .try_init()
        .map_err(|e| e.to_string())?;

    Ok(())
}
